//! # autodj Engine Library
//!
//! Track-selection and transition engine for an autonomous two-deck DJ.
//!
//! **Purpose:** score candidate next tracks by harmonic/tempo/energy fit,
//! plan bar-aligned transitions, execute the stepped crossfade against an
//! abstract deck, and adapt the transition style from listener feedback.
//!
//! **Layering (leaf first):**
//! - `types` / `services`: data model and the external metadata service
//! - `feature_store`: cached, coalesced feature and analysis lookups
//! - `planner`: next-track choice and transition timing
//! - `executor`: timed gain ramp against a [`executor::DeckControl`]
//! - `bandit`: epsilon-greedy linear transition-style selector
//! - `deck`: dual-deck gain graph with equal-power crossfader
//! - `session`: owns the above and runs the watch loop

pub mod analyzer;
pub mod bandit;
pub mod db;
pub mod deck;
pub mod error;
pub mod executor;
pub mod feature_store;
pub mod planner;
pub mod services;
pub mod session;
pub mod types;

pub use error::{Error, Result};
pub use session::DjSession;
