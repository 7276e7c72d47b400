//! Local signal analysis for tracks the metadata service does not know
//!
//! Coarse tempo and energy estimates from raw mono PCM. Key is never
//! estimated. The result is shaped as [`AudioFeatures`] so it can be dropped
//! into the feature store and scored like any catalog track.

use crate::error::{Error, Result};
use crate::types::AudioFeatures;
use tracing::debug;

/// Samples above this magnitude count as a peak
const PEAK_THRESHOLD: f32 = 0.5;

/// Minimum spacing between two counted peaks, in samples
const PEAK_MIN_GAP: usize = 2000;

/// Estimated tempo is folded into this range (BPM)
const BPM_RANGE: (f64, f64) = (80.0, 180.0);

/// RMS is scaled by this before clamping to an energy in 0..1
const ENERGY_GAIN: f64 = 3.0;

/// Estimate derived from one buffer of audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisEstimate {
    /// `None` when fewer than two peaks were found
    pub tempo: Option<f64>,
    pub energy: f64,
}

impl AnalysisEstimate {
    /// Features for `id`; unknown tempo is left at 0 so planners fall back
    pub fn into_features(self, id: impl Into<String>) -> AudioFeatures {
        AudioFeatures {
            id: id.into(),
            tempo: self.tempo.unwrap_or(0.0),
            key: None,
            mode: None,
            energy: self.energy,
            danceability: 0.5,
            loudness: 0.0,
        }
    }
}

/// Analyzer for audio the service has no features for
pub trait AudioAnalyzer: Send + Sync {
    fn analyze(&self, samples: &[f32]) -> Result<AnalysisEstimate>;
}

/// Peak-interval tempo and RMS energy
pub struct HeuristicAnalyzer {
    sample_rate: u32,
}

impl Default for HeuristicAnalyzer {
    fn default() -> Self {
        Self::new(44100)
    }
}

impl HeuristicAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn peaks(&self, samples: &[f32]) -> Vec<usize> {
        let mut peaks = Vec::new();
        let mut last: Option<usize> = None;

        for (i, s) in samples.iter().enumerate() {
            if s.abs() <= PEAK_THRESHOLD {
                continue;
            }
            if last.map_or(true, |p| i - p > PEAK_MIN_GAP) {
                peaks.push(i);
                last = Some(i);
            }
        }
        peaks
    }

    fn tempo(&self, peaks: &[usize]) -> Option<f64> {
        if peaks.len() < 2 {
            return None;
        }

        let mut intervals: Vec<usize> = peaks.windows(2).map(|w| w[1] - w[0]).collect();
        intervals.sort_unstable();
        let median = intervals[intervals.len() / 2] as f64;

        let mut bpm = 60.0 * self.sample_rate as f64 / median;
        while bpm < BPM_RANGE.0 {
            bpm *= 2.0;
        }
        while bpm > BPM_RANGE.1 {
            bpm /= 2.0;
        }
        Some(bpm.round())
    }

    fn energy(samples: &[f32]) -> f64 {
        let sum_squares: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        let rms = (sum_squares / samples.len() as f64).sqrt();
        (rms * ENERGY_GAIN).clamp(0.0, 1.0)
    }
}

impl AudioAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, samples: &[f32]) -> Result<AnalysisEstimate> {
        if samples.is_empty() {
            return Err(Error::InvalidState("empty sample buffer".to_string()));
        }

        let peaks = self.peaks(samples);
        let estimate = AnalysisEstimate {
            tempo: self.tempo(&peaks),
            energy: Self::energy(samples),
        };

        debug!(
            peaks = peaks.len(),
            tempo = ?estimate.tempo,
            energy = estimate.energy,
            "Heuristic analysis"
        );
        Ok(estimate)
    }
}
