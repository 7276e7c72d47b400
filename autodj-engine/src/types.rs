//! Core data model: tracks, features, structural analysis, transition plans

use autodj_common::events::NowPlaying;
use autodj_common::music_theory::{camelot_key, CamelotCode};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tokio::time::Instant;
use uuid::Uuid;

/// Tempo assumed when a track has no usable features
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Energy assumed when a track has no usable features
pub const DEFAULT_ENERGY: f64 = 0.5;

/// Beats per bar used for synthetic bar grids
pub const BEATS_PER_BAR: f64 = 4.0;

/// Synthetic bar grids always cover at least this many seconds
pub const MIN_SYNTHETIC_GRID_SECS: f64 = 60.0;

/// Immutable track identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    /// Opaque catalog key
    pub id: String,
    /// Playable locator handed to the deck
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    /// Zero when unknown
    #[serde(default)]
    pub duration_ms: u64,
}

fn default_energy() -> f64 {
    DEFAULT_ENERGY
}

/// Per-track scalar descriptors from the metadata service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub id: String,
    /// BPM; non-positive or non-finite means unknown
    #[serde(default)]
    pub tempo: f64,
    /// Pitch class 0-11
    #[serde(default)]
    pub key: Option<i32>,
    /// 1 = major, 0 = minor
    #[serde(default)]
    pub mode: Option<i32>,
    #[serde(default = "default_energy")]
    pub energy: f64,
    #[serde(default = "default_energy")]
    pub danceability: f64,
    /// dB, informational only
    #[serde(default)]
    pub loudness: f64,
}

impl AudioFeatures {
    /// Tempo with the 120 BPM fallback applied
    pub fn tempo_or_default(&self) -> f64 {
        if self.tempo.is_finite() && self.tempo > 0.0 {
            self.tempo
        } else {
            DEFAULT_TEMPO
        }
    }

    /// Energy with the 0.5 fallback applied for NaN values
    pub fn energy_or_default(&self) -> f64 {
        if self.energy.is_finite() {
            self.energy
        } else {
            DEFAULT_ENERGY
        }
    }

    /// Danceability with the 0.5 fallback applied for NaN values
    pub fn danceability_or_default(&self) -> f64 {
        if self.danceability.is_finite() {
            self.danceability
        } else {
            DEFAULT_ENERGY
        }
    }
}

/// Structural section descriptor (times in seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub loudness: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Per-track structural timing (times in seconds, ascending)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioAnalysis {
    #[serde(default)]
    pub bars: Vec<f64>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub beats: Vec<f64>,
}

/// Uniform bar grid derived from tempo and duration
///
/// Starts at 0 and covers `max(duration, 60s)`.
pub fn synthesize_bars(tempo: Option<f64>, duration_ms: u64) -> Vec<f64> {
    let tempo = tempo
        .filter(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(DEFAULT_TEMPO);
    let bar_secs = (60.0 / tempo) * BEATS_PER_BAR;
    let total_secs = (duration_ms as f64 / 1000.0).max(MIN_SYNTHETIC_GRID_SECS);

    let count = (total_secs / bar_secs).ceil() as usize;
    (0..count).map(|i| i as f64 * bar_secs).collect()
}

/// Track plus whatever enrichment is available for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTrack {
    #[serde(flatten)]
    pub track: TrackRef,
    pub features: Option<AudioFeatures>,
    pub analysis: Option<AudioAnalysis>,
    /// Derived from key + mode; `None` when either is unknown
    pub camelot: Option<CamelotCode>,
}

impl EnrichedTrack {
    pub fn new(
        track: TrackRef,
        features: Option<AudioFeatures>,
        analysis: Option<AudioAnalysis>,
    ) -> Self {
        let camelot = features.as_ref().and_then(|f| camelot_key(f.key, f.mode));
        Self {
            track,
            features,
            analysis,
            camelot,
        }
    }

    /// Track without any enrichment
    pub fn bare(track: TrackRef) -> Self {
        Self::new(track, None, None)
    }

    pub fn id(&self) -> &str {
        &self.track.id
    }

    pub fn duration_ms(&self) -> u64 {
        self.track.duration_ms
    }

    /// Tempo, defaulting to 120 BPM
    pub fn tempo(&self) -> f64 {
        self.features
            .as_ref()
            .map(AudioFeatures::tempo_or_default)
            .unwrap_or(DEFAULT_TEMPO)
    }

    /// Energy when features are known
    pub fn energy(&self) -> Option<f64> {
        self.features.as_ref().map(AudioFeatures::energy_or_default)
    }

    /// Energy, defaulting to 0.5
    pub fn energy_or_default(&self) -> f64 {
        self.energy().unwrap_or(DEFAULT_ENERGY)
    }

    pub fn sections(&self) -> &[Section] {
        self.analysis
            .as_ref()
            .map(|a| a.sections.as_slice())
            .unwrap_or(&[])
    }

    /// Bar start times in seconds, synthesized from tempo when analysis has none
    pub fn bar_grid(&self) -> Cow<'_, [f64]> {
        match self.analysis.as_ref() {
            Some(a) if !a.bars.is_empty() => Cow::Borrowed(a.bars.as_slice()),
            _ => Cow::Owned(synthesize_bars(
                self.features.as_ref().map(|f| f.tempo),
                self.duration_ms(),
            )),
        }
    }

    /// Now-playing snapshot with visual-safe defaults
    pub fn now_playing(&self) -> NowPlaying {
        NowPlaying {
            track_id: self.track.id.clone(),
            name: self.track.name.clone(),
            artists: self.track.artists.clone(),
            bpm: self.tempo(),
            energy: self.energy_or_default().clamp(0.0, 1.0),
            camelot: self.camelot.map(|c| c.to_string()),
        }
    }
}

/// A concrete, once-consumed transition
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub id: Uuid,
    /// Monotonic instant at which the incoming track starts
    pub at: Instant,
    pub fade_ms: u64,
    /// Offset into the incoming track where playback starts
    pub start_cue_ms: u64,
    pub gain_from: f32,
    pub gain_to: f32,
    /// Human-readable diagnostics (never parsed)
    pub reason: String,
    pub next: EnrichedTrack,
    /// Outro window start on the outgoing track
    pub outro_start_ms: u64,
    /// Minimum fade derived from outro headroom
    pub min_fade_ms: u64,
}

impl TransitionPlan {
    /// Milliseconds from `now` until the transition starts
    pub fn delay_ms(&self, now: Instant) -> u64 {
        autodj_common::time::millis_until(self.at, now)
    }
}
