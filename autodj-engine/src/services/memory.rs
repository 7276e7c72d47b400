//! In-memory track service
//!
//! Serves features and analysis from a fixed table. Used for JSON pool files
//! on the command line and as a scriptable fake in tests (forbidden IDs,
//! failing batches, artificial latency, call counters).

use super::{ServiceError, TrackService};
use crate::types::{AudioAnalysis, AudioFeatures, TrackRef};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One track in a JSON pool file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    #[serde(flatten)]
    pub track: TrackRef,
    #[serde(default)]
    pub features: Option<AudioFeatures>,
    #[serde(default)]
    pub analysis: Option<AudioAnalysis>,
}

/// Read a JSON array of [`PoolEntry`] from disk
pub fn load_pool(path: &Path) -> Result<Vec<PoolEntry>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<PoolEntry> = serde_json::from_str(&content)?;
    Ok(entries)
}

#[derive(Default)]
pub struct StaticTrackService {
    features: HashMap<String, AudioFeatures>,
    analysis: HashMap<String, AudioAnalysis>,
    forbidden: HashSet<String>,
    failing: HashSet<String>,
    latency: Option<Duration>,
    feature_calls: AtomicUsize,
    analysis_calls: AtomicUsize,
}

impl StaticTrackService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve whatever enrichment the pool entries carry
    pub fn from_pool(entries: &[PoolEntry]) -> Self {
        let mut service = Self::new();
        for entry in entries {
            if let Some(f) = &entry.features {
                let mut f = f.clone();
                f.id = entry.track.id.clone();
                service.features.insert(f.id.clone(), f);
            }
            if let Some(a) = &entry.analysis {
                service.analysis.insert(entry.track.id.clone(), a.clone());
            }
        }
        service
    }

    pub fn with_features(mut self, features: AudioFeatures) -> Self {
        self.features.insert(features.id.clone(), features);
        self
    }

    pub fn with_analysis(mut self, id: &str, analysis: AudioAnalysis) -> Self {
        self.analysis.insert(id.to_string(), analysis);
        self
    }

    /// Analysis for `id` answers 403
    pub fn forbid(mut self, id: &str) -> Self {
        self.forbidden.insert(id.to_string());
        self
    }

    /// Any feature batch or analysis request touching `id` fails with a network error
    pub fn fail_for(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    /// Every request sleeps this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn feature_calls(&self) -> usize {
        self.feature_calls.load(Ordering::SeqCst)
    }

    pub fn analysis_calls(&self) -> usize {
        self.analysis_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TrackService for StaticTrackService {
    async fn audio_features(
        &self,
        ids: &[String],
    ) -> std::result::Result<HashMap<String, AudioFeatures>, ServiceError> {
        self.feature_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(bad) = ids.iter().find(|id| self.failing.contains(*id)) {
            return Err(ServiceError::Network(format!("connection reset ({})", bad)));
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.features.get(id).map(|f| (id.clone(), f.clone())))
            .collect())
    }

    async fn audio_analysis(&self, id: &str) -> std::result::Result<AudioAnalysis, ServiceError> {
        self.analysis_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.forbidden.contains(id) {
            return Err(ServiceError::Forbidden(id.to_string()));
        }
        if self.failing.contains(id) {
            return Err(ServiceError::Network(format!("timeout ({})", id)));
        }

        self.analysis
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }
}
