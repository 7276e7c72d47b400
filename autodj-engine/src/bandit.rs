//! Adaptive transition-style selector
//!
//! Epsilon-greedy contextual bandit: one linear weight vector per style over
//! `[bias, tempo delta, key compatibility, energy delta, section position]`.
//! Only the most recent decision can be rewarded; a newer decision replaces
//! it whether or not feedback arrived.
//!
//! Weights persist through a [`WeightStore`] after every update as a flat
//! JSON object `{ "<style>": [f64; 5], ... }`.

use crate::error::{Error, Result};
use crate::types::EnrichedTrack;
use async_trait::async_trait;
use autodj_common::config::BanditConfig;
use autodj_common::music_theory::is_harmonic;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bias plus four context features
pub const FEATURE_DIM: usize = 5;

/// Transition styles, in tie-break order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStyle {
    #[serde(rename = "straight_xfade")]
    StraightCrossfade,
    FilterSweep,
    EchoOut,
}

impl TransitionStyle {
    pub const ALL: [TransitionStyle; 3] = [
        TransitionStyle::StraightCrossfade,
        TransitionStyle::FilterSweep,
        TransitionStyle::EchoOut,
    ];

    /// Persisted/wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStyle::StraightCrossfade => "straight_xfade",
            TransitionStyle::FilterSweep => "filter_sweep",
            TransitionStyle::EchoOut => "echo_out",
        }
    }
}

impl fmt::Display for TransitionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User feedback on the last transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Like,
    Dislike,
    Applause,
}

impl Feedback {
    pub fn reward(&self) -> f64 {
        match self {
            Feedback::Like => 1.0,
            Feedback::Applause => 0.5,
            Feedback::Dislike => -1.0,
        }
    }

}

impl FromStr for Feedback {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "like" => Ok(Feedback::Like),
            "dislike" => Ok(Feedback::Dislike),
            "applause" => Ok(Feedback::Applause),
            other => Err(Error::InvalidState(format!("unknown feedback {:?}", other))),
        }
    }
}

/// Raw context of one transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionContext {
    /// BPM delta, next minus current
    pub tempo_delta: f64,
    pub key_compatible: bool,
    /// Energy delta, next minus current
    pub energy_delta: f64,
    /// Where in the outgoing track the transition starts (0..1)
    pub section_position: f64,
}

impl TransitionContext {
    /// Context for moving from `current` to `next` at the outro window start
    pub fn between(current: &EnrichedTrack, next: &EnrichedTrack, outro_start_ms: u64) -> Self {
        let duration = current.duration_ms();
        let section_position = if duration > 0 {
            outro_start_ms as f64 / duration as f64
        } else {
            0.0
        };

        Self {
            tempo_delta: next.tempo() - current.tempo(),
            key_compatible: is_harmonic(current.camelot, next.camelot),
            energy_delta: next.energy_or_default() - current.energy_or_default(),
            section_position,
        }
    }

    /// Normalized, clamped feature vector
    pub fn feature_vector(&self) -> [f64; FEATURE_DIM] {
        [
            1.0,
            (self.tempo_delta / 20.0).clamp(-2.0, 2.0),
            if self.key_compatible { 1.0 } else { 0.0 },
            self.energy_delta.clamp(-1.0, 1.0),
            self.section_position.clamp(0.0, 1.0),
        ]
    }
}

/// Per-style weight vectors
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    weights: HashMap<TransitionStyle, [f64; FEATURE_DIM]>,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            weights: TransitionStyle::ALL
                .iter()
                .map(|s| (*s, [0.0; FEATURE_DIM]))
                .collect(),
        }
    }
}

impl WeightTable {
    pub fn get(&self, style: TransitionStyle) -> [f64; FEATURE_DIM] {
        self.weights
            .get(&style)
            .copied()
            .unwrap_or([0.0; FEATURE_DIM])
    }

    fn get_mut(&mut self, style: TransitionStyle) -> &mut [f64; FEATURE_DIM] {
        self.weights.entry(style).or_insert([0.0; FEATURE_DIM])
    }

    pub fn score(&self, style: TransitionStyle, features: &[f64; FEATURE_DIM]) -> f64 {
        self.get(style)
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum()
    }

    /// Parse the persisted layout
    ///
    /// Every style must be present as an array of numbers. Short arrays are
    /// zero-padded and long ones truncated. Anything else is corrupt.
    pub fn from_json(raw: &str) -> Option<Self> {
        let parsed: HashMap<String, Vec<f64>> = serde_json::from_str(raw).ok()?;

        let mut table = WeightTable::default();
        for style in TransitionStyle::ALL {
            let stored = parsed.get(style.as_str())?;
            let slot = table.get_mut(style);
            for (i, w) in stored.iter().take(FEATURE_DIM).enumerate() {
                slot[i] = if w.is_finite() { *w } else { 0.0 };
            }
        }
        Some(table)
    }

    pub fn to_json(&self) -> Result<String> {
        let flat: HashMap<&str, Vec<f64>> = TransitionStyle::ALL
            .iter()
            .map(|s| (s.as_str(), self.get(*s).to_vec()))
            .collect();
        Ok(serde_json::to_string(&flat)?)
    }
}

/// Durable storage for the serialized weight table
#[async_trait]
pub trait WeightStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, raw: &str) -> Result<()>;
}

/// Process-local store (tests, database-less runs)
#[derive(Default)]
pub struct MemoryWeightStore {
    value: tokio::sync::Mutex<Option<String>>,
}

impl MemoryWeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(raw: impl Into<String>) -> Self {
        Self {
            value: tokio::sync::Mutex::new(Some(raw.into())),
        }
    }
}

#[async_trait]
impl WeightStore for MemoryWeightStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.value.lock().await.clone())
    }

    async fn save(&self, raw: &str) -> Result<()> {
        *self.value.lock().await = Some(raw.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Decision {
    style: TransitionStyle,
    features: [f64; FEATURE_DIM],
}

pub struct StyleSelector {
    table: WeightTable,
    last: Option<Decision>,
    store: Arc<dyn WeightStore>,
    learning_rate: f64,
    epsilon: f64,
    rng: StdRng,
}

impl StyleSelector {
    /// Load persisted weights, falling back to zeros when missing or corrupt
    pub async fn load(store: Arc<dyn WeightStore>, config: &BanditConfig) -> Self {
        Self::load_with_rng(store, config, StdRng::from_entropy()).await
    }

    pub async fn load_with_rng(
        store: Arc<dyn WeightStore>,
        config: &BanditConfig,
        rng: StdRng,
    ) -> Self {
        let table = match store.load().await {
            Ok(Some(raw)) => match WeightTable::from_json(&raw) {
                Some(table) => {
                    info!("Loaded transition-style weights");
                    table
                }
                None => {
                    warn!("Stored transition-style weights are corrupt; starting from zero");
                    WeightTable::default()
                }
            },
            Ok(None) => {
                debug!("No stored transition-style weights; starting from zero");
                WeightTable::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read transition-style weights; starting from zero");
                WeightTable::default()
            }
        };

        Self {
            table,
            last: None,
            store,
            learning_rate: config.learning_rate,
            epsilon: config.epsilon,
            rng,
        }
    }

    pub fn weights(&self) -> &WeightTable {
        &self.table
    }

    /// Configured exploration rate
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Style of the decision a reward would currently apply to
    pub fn last_style(&self) -> Option<TransitionStyle> {
        self.last.map(|d| d.style)
    }

    /// Choose a style for `context`, recording it as the last decision
    pub fn pick_action(&mut self, context: &TransitionContext, epsilon: f64) -> TransitionStyle {
        let features = context.feature_vector();

        let style = if epsilon > 0.0 && self.rng.gen::<f64>() < epsilon {
            TransitionStyle::ALL[self.rng.gen_range(0..TransitionStyle::ALL.len())]
        } else {
            let mut best = TransitionStyle::ALL[0];
            let mut best_score = self.table.score(best, &features);
            for style in &TransitionStyle::ALL[1..] {
                let score = self.table.score(*style, &features);
                if score > best_score {
                    best = *style;
                    best_score = score;
                }
            }
            best
        };

        debug!(style = %style, ?features, "Transition style picked");
        self.last = Some(Decision { style, features });
        style
    }

    /// One gradient step toward `feedback` for the last decision
    ///
    /// Returns the rewarded style, or `None` when nothing has been decided
    /// yet. The in-memory update stands even if persisting it fails.
    pub async fn send_reward(&mut self, feedback: Feedback) -> Result<Option<TransitionStyle>> {
        let Some(decision) = self.last else {
            debug!(?feedback, "Reward ignored: no decision yet");
            return Ok(None);
        };

        let step = self.learning_rate * feedback.reward();
        let weights = self.table.get_mut(decision.style);
        for (w, x) in weights.iter_mut().zip(decision.features.iter()) {
            *w += step * x;
        }

        info!(style = %decision.style, ?feedback, "Transition-style weights updated");

        let raw = self.table.to_json()?;
        self.store.save(&raw).await?;
        Ok(Some(decision.style))
    }
}
