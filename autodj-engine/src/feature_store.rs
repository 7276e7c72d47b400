//! Per-track feature and analysis cache
//!
//! Wraps a [`TrackService`] with:
//! - chunked feature fetches (a failed chunk leaves its IDs unfeatured)
//! - per-ID analysis fetches capped to a prefix of the pool
//! - a negative cache for catalog-restricted (403) analysis
//! - request coalescing: callers asking for an ID already in flight await
//!   the same shared future instead of issuing a second request
//!
//! Nothing here returns an error to the caller. Missing data is absent data.

use crate::services::{ServiceError, TrackService};
use crate::types::{AudioAnalysis, AudioFeatures, EnrichedTrack, TrackRef};
use autodj_common::config::FeatureStoreConfig;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type FeatureFetch = Shared<BoxFuture<'static, ()>>;
type AnalysisFetch = Shared<BoxFuture<'static, Option<AudioAnalysis>>>;

#[derive(Debug, Clone)]
enum AnalysisEntry {
    Loaded(AudioAnalysis),
    /// Catalog restriction; never retried this session
    Forbidden,
}

#[derive(Default)]
struct StoreInner {
    features: HashMap<String, AudioFeatures>,
    analysis: HashMap<String, AnalysisEntry>,
    features_in_flight: HashMap<String, FeatureFetch>,
    analysis_in_flight: HashMap<String, AnalysisFetch>,
}

pub struct FeatureStore {
    service: Arc<dyn TrackService>,
    inner: Arc<Mutex<StoreInner>>,
    chunk_size: usize,
    analysis_prefix_limit: usize,
}

impl FeatureStore {
    pub fn new(service: Arc<dyn TrackService>, config: &FeatureStoreConfig) -> Self {
        Self {
            service,
            inner: Arc::new(Mutex::new(StoreInner::default())),
            chunk_size: config.chunk_size.max(1),
            analysis_prefix_limit: config.analysis_prefix_limit,
        }
    }

    /// Fetch features for every uncached ID, then return what is known
    pub async fn fetch_features(&self, ids: &[String]) -> HashMap<String, AudioFeatures> {
        let mut waits: Vec<FeatureFetch> = Vec::new();

        {
            let mut inner = self.inner.lock().await;
            let mut seen = HashSet::new();
            let mut missing = Vec::new();

            for id in ids {
                if !seen.insert(id.as_str()) || inner.features.contains_key(id) {
                    continue;
                }
                match inner.features_in_flight.get(id) {
                    Some(fetch) => push_unique(&mut waits, fetch.clone()),
                    None => missing.push(id.clone()),
                }
            }

            for chunk in missing.chunks(self.chunk_size) {
                let fetch = self.spawn_feature_chunk(chunk.to_vec());
                for id in chunk {
                    inner.features_in_flight.insert(id.clone(), fetch.clone());
                }
                waits.push(fetch);
            }
        }

        join_all(waits).await;

        let inner = self.inner.lock().await;
        ids.iter()
            .filter_map(|id| inner.features.get(id).map(|f| (id.clone(), f.clone())))
            .collect()
    }

    fn spawn_feature_chunk(&self, chunk: Vec<String>) -> FeatureFetch {
        let service = Arc::clone(&self.service);
        let inner = Arc::clone(&self.inner);

        async move {
            let result = service.audio_features(&chunk).await;

            let mut inner = inner.lock().await;
            for id in &chunk {
                inner.features_in_flight.remove(id);
            }

            match result {
                Ok(found) => {
                    debug!(requested = chunk.len(), received = found.len(), "Feature chunk merged");
                    inner.features.extend(found);
                }
                Err(e) => {
                    warn!(ids = chunk.len(), error = %e, "Feature chunk failed; tracks left unfeatured");
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Structural analysis for one track
    ///
    /// `None` when the track is restricted, the fetch failed, or the service
    /// has nothing for it. Only restrictions are remembered.
    pub async fn fetch_analysis(&self, id: &str) -> Option<AudioAnalysis> {
        let fetch = {
            let mut inner = self.inner.lock().await;

            match inner.analysis.get(id) {
                Some(AnalysisEntry::Loaded(a)) => return Some(a.clone()),
                Some(AnalysisEntry::Forbidden) => return None,
                None => {}
            }

            match inner.analysis_in_flight.get(id) {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = self.spawn_analysis(id.to_string());
                    inner.analysis_in_flight.insert(id.to_string(), fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    fn spawn_analysis(&self, id: String) -> AnalysisFetch {
        let service = Arc::clone(&self.service);
        let inner = Arc::clone(&self.inner);

        async move {
            let result = service.audio_analysis(&id).await;

            let mut inner = inner.lock().await;
            inner.analysis_in_flight.remove(&id);

            match result {
                Ok(analysis) => {
                    inner
                        .analysis
                        .insert(id, AnalysisEntry::Loaded(analysis.clone()));
                    Some(analysis)
                }
                Err(ServiceError::Forbidden(_)) => {
                    warn!(track_id = %id, "Analysis forbidden (catalog restriction); not retrying");
                    inner.analysis.insert(id, AnalysisEntry::Forbidden);
                    None
                }
                Err(e) => {
                    debug!(track_id = %id, error = %e, "Analysis unavailable");
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Fetch analysis for the first `analysis_prefix_limit` IDs, one at a time
    pub async fn fetch_analysis_prefix(&self, ids: &[String]) {
        for id in ids.iter().take(self.analysis_prefix_limit) {
            self.fetch_analysis(id).await;
        }
    }

    /// Features for the whole pool, analysis for its prefix, then assemble
    pub async fn enrich_pool(&self, tracks: &[TrackRef]) -> Vec<EnrichedTrack> {
        let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();

        let features = self.fetch_features(&ids).await;
        self.fetch_analysis_prefix(&ids).await;

        let pool = self.enrich_all(tracks).await;

        info!(
            tracks = tracks.len(),
            featured = features.len(),
            analyzed = pool.iter().filter(|t| t.analysis.is_some()).count(),
            "Pool enriched"
        );

        pool
    }

    /// Build enriched tracks from whatever is already cached
    pub async fn enrich_all(&self, tracks: &[TrackRef]) -> Vec<EnrichedTrack> {
        let inner = self.inner.lock().await;
        tracks
            .iter()
            .map(|t| {
                let analysis = match inner.analysis.get(&t.id) {
                    Some(AnalysisEntry::Loaded(a)) => Some(a.clone()),
                    _ => None,
                };
                EnrichedTrack::new(t.clone(), inner.features.get(&t.id).cloned(), analysis)
            })
            .collect()
    }

    /// Cached features, if any
    pub async fn features(&self, id: &str) -> Option<AudioFeatures> {
        self.inner.lock().await.features.get(id).cloned()
    }

    /// Whether analysis for `id` is known to be restricted
    pub async fn is_forbidden(&self, id: &str) -> bool {
        matches!(
            self.inner.lock().await.analysis.get(id),
            Some(AnalysisEntry::Forbidden)
        )
    }

    /// Seed the cache with locally estimated features (non-catalog sources)
    pub async fn insert_features(&self, features: AudioFeatures) {
        debug!(track_id = %features.id, tempo = features.tempo, "Estimated features cached");
        self.inner
            .lock()
            .await
            .features
            .insert(features.id.clone(), features);
    }
}

fn push_unique(waits: &mut Vec<FeatureFetch>, fetch: FeatureFetch) {
    if !waits.iter().any(|w| w.ptr_eq(&fetch)) {
        waits.push(fetch);
    }
}
