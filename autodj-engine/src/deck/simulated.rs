//! Simulated deck sources
//!
//! Clock-driven stand-ins for real playback: position advances with the
//! tokio clock from the cue point, and rendering produces either a constant
//! level or a click on every beat. Used by the `simulate` command and tests.

use super::{DeckSource, SourceFactory};
use crate::error::{Error, Result};
use crate::types::DEFAULT_TEMPO;
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;
use tracing::debug;

pub const SIMULATED_SAMPLE_RATE: u32 = 44_100;

/// Click length as a fraction of one beat
const CLICK_FRACTION: f64 = 0.05;

enum Signal {
    Constant(f32),
    Pulse { samples_per_beat: u64, click: u64, amplitude: f32 },
}

pub struct SimulatedStream {
    signal: Signal,
    started: Option<(Instant, u64)>,
    cursor: u64,
}

impl SimulatedStream {
    /// Stream rendering a constant level
    pub fn constant(level: f32) -> Self {
        Self {
            signal: Signal::Constant(level),
            started: None,
            cursor: 0,
        }
    }

    /// Stream rendering a click of `amplitude` at `bpm`
    pub fn pulse(bpm: f64, amplitude: f32) -> Self {
        let bpm = if bpm.is_finite() && bpm > 0.0 { bpm } else { DEFAULT_TEMPO };
        let samples_per_beat = ((SIMULATED_SAMPLE_RATE as f64 * 60.0 / bpm).round() as u64).max(1);
        let click = ((samples_per_beat as f64 * CLICK_FRACTION).round() as u64).max(1);

        Self {
            signal: Signal::Pulse { samples_per_beat, click, amplitude },
            started: None,
            cursor: 0,
        }
    }
}

impl super::StreamSource for SimulatedStream {
    fn play(&mut self, uri: &str, cue_ms: u64) -> Result<()> {
        debug!(uri = %uri, cue_ms, "Simulated stream started");
        self.started = Some((Instant::now(), cue_ms));
        self.cursor = cue_ms * SIMULATED_SAMPLE_RATE as u64 / 1000;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn is_ready(&self) -> bool {
        self.started.is_some()
    }

    fn position_ms(&self) -> Option<u64> {
        self.started
            .map(|(at, cue)| cue + at.elapsed().as_millis() as u64)
    }

    fn render(&mut self, out: &mut [f32]) -> usize {
        if self.started.is_none() {
            return 0;
        }

        match self.signal {
            Signal::Constant(level) => out.fill(level),
            Signal::Pulse { samples_per_beat, click, amplitude } => {
                for s in out.iter_mut() {
                    *s = if self.cursor % samples_per_beat < click { amplitude } else { 0.0 };
                    self.cursor += 1;
                }
            }
        }
        out.len()
    }
}

/// Builds [`SimulatedStream`]s, pulsing at each URI's registered tempo
#[derive(Default)]
pub struct SimulatedFactory {
    tempos: HashMap<String, f64>,
    failing: HashSet<String>,
}

impl SimulatedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tempo(mut self, uri: impl Into<String>, bpm: f64) -> Self {
        self.tempos.insert(uri.into(), bpm);
        self
    }

    /// Make source creation fail for `uri`
    pub fn fail_uri(mut self, uri: impl Into<String>) -> Self {
        self.failing.insert(uri.into());
        self
    }
}

impl SourceFactory for SimulatedFactory {
    fn create(&self, uri: &str) -> Result<DeckSource> {
        if self.failing.contains(uri) {
            return Err(Error::Playback(format!("cannot open {}", uri)));
        }
        let bpm = self.tempos.get(uri).copied().unwrap_or(DEFAULT_TEMPO);
        Ok(DeckSource::Stream(Box::new(SimulatedStream::pulse(bpm, 0.4))))
    }
}
