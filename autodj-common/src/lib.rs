//! # autodj Common Library
//!
//! Shared code for the autodj engine and its tools:
//! - Music theory helpers (Camelot wheel, clamp/lerp)
//! - Fade curve definitions and the equal-power crossfade law
//! - Event types (DjEvent enum) and the EventBus
//! - Configuration loading
//! - Time utilities

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod music_theory;
pub mod time;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use music_theory::{camelot_key, is_harmonic, CamelotCode};
