//! Configuration loading and config file resolution
//!
//! Every tunable of the engine lives here with its built-in default. The
//! defaults are empirically tuned values, not physical constants, so all of
//! them can be overridden from TOML.
//!
//! # Resolution order
//! 1. Command-line `--config` path (highest priority)
//! 2. `AUTODJ_CONFIG` environment variable
//! 3. `<config_dir>/autodj/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not an error; a file that exists but does not parse is.

use crate::fade_curves::FadeCurve;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AUTODJ_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DjConfig {
    /// SQLite file holding persisted settings (bandit weights)
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub feature_store: FeatureStoreConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub bandit: BanditConfig,
    pub session: SessionConfig,
    pub decks: DeckConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error or a full EnvFilter string)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Metadata/feature service connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Minimum spacing between requests
    pub min_request_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.spotify.com/v1".to_string(),
            min_request_interval_ms: 100,
            timeout_secs: 30,
        }
    }
}

/// Feature store batching limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureStoreConfig {
    /// IDs per feature request (service limit is 100)
    pub chunk_size: usize,
    /// Analysis is only fetched for this many tracks from the front of the pool
    pub analysis_prefix_limit: usize,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            analysis_prefix_limit: 50,
        }
    }
}

/// Candidate scoring and transition timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub key_weight: f64,
    pub bpm_weight: f64,
    pub energy_weight: f64,
    pub danceability_weight: f64,
    /// Key term when harmonic / when clashing
    pub harmonic_bonus: f64,
    pub clash_penalty: f64,
    /// BPM delta divisor and cap for the tempo term
    pub bpm_delta_divisor: f64,
    pub bpm_penalty_cap: f64,
    pub energy_delta_scale: f64,

    /// Nominal fade length scaled 80%..120% by energy
    pub target_fade_ms: u64,
    /// Fade length when energy is unknown
    pub fallback_fade_ms: u64,

    /// A section starting inside this window (seconds) is the preferred cue
    pub intro_window_start_secs: f64,
    pub intro_window_end_secs: f64,
    /// Cap on the tempo-derived cue fallback
    pub cue_fallback_cap_ms: u64,

    /// Outro window default: this far before the end when no sections are known
    pub outro_lead_ms: u64,
    /// The outro window never starts later than this before the end
    pub outro_min_tail_ms: u64,
    /// Headroom above which the long minimum fade applies
    pub headroom_threshold_ms: u64,
    pub long_min_fade_ms: u64,
    pub short_min_fade_ms: u64,

    /// Earliest a transition may start after planning
    pub min_lead_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            key_weight: 1.2,
            bpm_weight: 1.0,
            energy_weight: 0.8,
            danceability_weight: 0.2,
            harmonic_bonus: 1.0,
            clash_penalty: -0.5,
            bpm_delta_divisor: 6.0,
            bpm_penalty_cap: 2.0,
            energy_delta_scale: 0.8,
            target_fade_ms: 12_000,
            fallback_fade_ms: 9_000,
            intro_window_start_secs: 10.0,
            intro_window_end_secs: 30.0,
            cue_fallback_cap_ms: 15_000,
            outro_lead_ms: 24_000,
            outro_min_tail_ms: 8_000,
            headroom_threshold_ms: 20_000,
            long_min_fade_ms: 12_000,
            short_min_fade_ms: 8_000,
            min_lead_ms: 500,
        }
    }
}

/// Crossfade execution
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Discrete gain steps across the fade
    pub fade_steps: u32,
    /// Starting gain of the incoming deck (never exactly zero)
    pub silent_gain: f32,
    pub ramp_curve: FadeCurve,
    pub filter_sweep_probability: f64,
    /// Opening sweep lasts min(this, fade/2000) seconds
    pub max_start_sweep_secs: f64,
    pub mid_sweep_secs: f64,
    /// Bound on waiting for the incoming deck to start
    pub start_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fade_steps: 30,
            silent_gain: 0.0001,
            ramp_curve: FadeCurve::Linear,
            filter_sweep_probability: 0.7,
            max_start_sweep_secs: 1.5,
            mid_sweep_secs: 0.9,
            start_timeout_ms: 8_000,
        }
    }
}

/// Adaptive transition-style selector
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    pub epsilon: f64,
    pub learning_rate: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.15,
            learning_rate: 0.08,
        }
    }
}

/// Session watch loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Plan the next transition once less than this remains on the current track
    pub plan_threshold_ms: u64,
    pub tick_interval_ms: u64,
    /// Cooldown between like/dislike submissions
    pub feedback_cooldown_ms: u64,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            plan_threshold_ms: 25_000,
            tick_interval_ms: 250,
            feedback_cooldown_ms: 3_000,
            event_capacity: 256,
        }
    }
}

/// Dual-deck graph
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    /// Manual crossfade length and step count
    pub crossfade_ms: u64,
    pub crossfade_steps: u32,
    /// Samples held by each deck's amplitude probe
    pub probe_window: usize,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: 14_000,
            crossfade_steps: 40,
            probe_window: 2048,
        }
    }
}

impl DjConfig {
    /// Load configuration following the resolution order
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DjConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.feature_store.chunk_size == 0 || self.feature_store.chunk_size > 100 {
            return Err(Error::Config(format!(
                "feature_store.chunk_size must be 1..=100, got {}",
                self.feature_store.chunk_size
            )));
        }
        if self.executor.fade_steps == 0 {
            return Err(Error::Config("executor.fade_steps must be > 0".to_string()));
        }
        if !(self.executor.silent_gain > 0.0 && self.executor.silent_gain < 1.0) {
            return Err(Error::Config(format!(
                "executor.silent_gain must be in (0, 1), got {}",
                self.executor.silent_gain
            )));
        }
        if !(0.0..=1.0).contains(&self.executor.filter_sweep_probability) {
            return Err(Error::Config(
                "executor.filter_sweep_probability must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.bandit.epsilon) {
            return Err(Error::Config("bandit.epsilon must be in [0, 1]".to_string()));
        }
        if self.planner.bpm_delta_divisor <= 0.0 {
            return Err(Error::Config(
                "planner.bpm_delta_divisor must be > 0".to_string(),
            ));
        }
        if self.decks.crossfade_steps == 0 || self.session.tick_interval_ms == 0 {
            return Err(Error::Config(
                "decks.crossfade_steps and session.tick_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Find the config file to load, if any
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory
    dirs::config_dir()
        .map(|d| d.join("autodj").join("config.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("autodj").join("autodj.db"))
        .unwrap_or_else(|| PathBuf::from("./autodj_data/autodj.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        DjConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = DjConfig::from_toml_str(
            r#"
            [planner]
            target_fade_ms = 16000

            [bandit]
            epsilon = 0.0
            "#,
        )
        .unwrap();

        assert_eq!(config.planner.target_fade_ms, 16_000);
        assert_eq!(config.planner.fallback_fade_ms, 9_000);
        assert_eq!(config.bandit.epsilon, 0.0);
        assert_eq!(config.bandit.learning_rate, 0.08);
        assert_eq!(config.executor.fade_steps, 30);
    }

    #[test]
    fn test_ramp_curve_parses() {
        let config = DjConfig::from_toml_str("[executor]\nramp_curve = \"equal_power\"\n").unwrap();
        assert_eq!(config.executor.ramp_curve, FadeCurve::EqualPower);
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let err = DjConfig::from_toml_str("[feature_store]\nchunk_size = 250\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_silent_gain_rejected() {
        assert!(DjConfig::from_toml_str("[executor]\nsilent_gain = 0.0\n").is_err());
    }
}
