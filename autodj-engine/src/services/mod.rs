//! External track metadata service
//!
//! The engine only sees the [`TrackService`] trait. `http` talks to the
//! catalog's web API, `memory` serves a fixed pool (CLI pool files, tests).

pub mod http;
pub mod memory;

pub use http::HttpTrackService;
pub use memory::StaticTrackService;

use crate::types::{AudioAnalysis, AudioFeatures};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Track service errors
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Catalog/region restriction; will not succeed for this ID this session
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Track unknown to the service
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Service returned an error response
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Failed to parse response JSON
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ServiceError {
    /// Whether a retry later in the session may succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, ServiceError::Forbidden(_))
    }
}

/// Feature and analysis lookup
#[async_trait]
pub trait TrackService: Send + Sync {
    /// Batched feature lookup
    ///
    /// IDs the service has no features for are simply absent from the map.
    async fn audio_features(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, AudioFeatures>, ServiceError>;

    /// Structural analysis for one track
    async fn audio_analysis(&self, id: &str) -> Result<AudioAnalysis, ServiceError>;
}
