//! Catalog web API client
//!
//! Features come from the batched `audio-features?ids=` endpoint, analysis from
//! the per-track `audio-analysis/{id}` endpoint. A 403 on analysis is the
//! catalog's "restricted for this market" answer and maps to
//! [`ServiceError::Forbidden`].

use super::{ServiceError, TrackService};
use crate::types::{AudioAnalysis, AudioFeatures, Section};
use async_trait::async_trait;
use autodj_common::config::ServiceConfig;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

const USER_AGENT: &str = concat!("autodj/", env!("CARGO_PKG_VERSION"));

/// Raw feature object; every field may be missing or null
#[derive(Debug, Deserialize)]
struct RawFeatures {
    id: String,
    tempo: Option<f64>,
    key: Option<i32>,
    mode: Option<i32>,
    energy: Option<f64>,
    danceability: Option<f64>,
    loudness: Option<f64>,
}

impl From<RawFeatures> for AudioFeatures {
    fn from(raw: RawFeatures) -> Self {
        AudioFeatures {
            id: raw.id,
            tempo: raw.tempo.unwrap_or(0.0),
            // -1 is the service's "no key detected"
            key: raw.key.filter(|k| *k >= 0),
            mode: raw.mode.filter(|m| *m == 0 || *m == 1),
            energy: raw.energy.unwrap_or(crate::types::DEFAULT_ENERGY),
            danceability: raw.danceability.unwrap_or(crate::types::DEFAULT_ENERGY),
            loudness: raw.loudness.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeaturesResponse {
    #[serde(default)]
    audio_features: Vec<Option<RawFeatures>>,
}

#[derive(Debug, Deserialize)]
struct RawInterval {
    start: f64,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    start: f64,
    #[serde(default)]
    duration: f64,
    loudness: Option<f64>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    bars: Vec<RawInterval>,
    #[serde(default)]
    sections: Vec<RawSection>,
    #[serde(default)]
    beats: Vec<RawInterval>,
}

impl From<AnalysisResponse> for AudioAnalysis {
    fn from(raw: AnalysisResponse) -> Self {
        AudioAnalysis {
            bars: raw.bars.into_iter().map(|b| b.start.max(0.0)).collect(),
            sections: raw
                .sections
                .into_iter()
                .map(|s| Section {
                    start: s.start.max(0.0),
                    duration: s.duration,
                    loudness: s.loudness,
                    confidence: s.confidence,
                })
                .collect(),
            beats: raw.beats.into_iter().map(|b| b.start.max(0.0)).collect(),
        }
    }
}

/// Hands out request slots at least `spacing` apart
///
/// Each caller reserves its slot under the lock and sleeps outside it, so
/// concurrent feature and analysis fetches queue in arrival order.
struct RequestPacer {
    next_slot: Mutex<Option<Instant>>,
    spacing: Duration,
}

impl RequestPacer {
    fn new(spacing_ms: u64) -> Self {
        Self {
            next_slot: Mutex::new(None),
            spacing: Duration::from_millis(spacing_ms),
        }
    }

    /// Reserve the next slot; returns when it arrives
    async fn pace(&self, url: &str) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.spacing);
            slot
        };

        let now = Instant::now();
        if slot > now {
            tracing::debug!(
                url = %url,
                wait_ms = (slot - now).as_millis() as u64,
                "Throttling track service request"
            );
            sleep_until(slot).await;
        }
    }
}

/// Web API track service
pub struct HttpTrackService {
    http_client: reqwest::Client,
    base_url: String,
    access_token: String,
    pacer: Arc<RequestPacer>,
}

impl HttpTrackService {
    /// Create a client authenticating with a bearer token
    pub fn new(config: &ServiceConfig, access_token: impl Into<String>) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            pacer: Arc::new(RequestPacer::new(config.min_request_interval_ms)),
        })
    }

    async fn get(&self, url: &str, id_for_errors: &str) -> Result<reqwest::Response, ServiceError> {
        self.pacer.pace(url).await;

        tracing::debug!(url = %url, "Querying track service");

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Forbidden(id_for_errors.to_string()));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(id_for_errors.to_string()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl TrackService for HttpTrackService {
    async fn audio_features(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, AudioFeatures>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/audio-features?ids={}", self.base_url, ids.join(","));
        let response = self.get(&url, &ids.join(",")).await?;

        let body: FeaturesResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let features: HashMap<String, AudioFeatures> = body
            .audio_features
            .into_iter()
            .flatten()
            .map(|raw| {
                let f = AudioFeatures::from(raw);
                (f.id.clone(), f)
            })
            .collect();

        tracing::debug!(requested = ids.len(), received = features.len(), "Feature batch fetched");

        Ok(features)
    }

    async fn audio_analysis(&self, id: &str) -> Result<AudioAnalysis, ServiceError> {
        let url = format!("{}/audio-analysis/{}", self.base_url, id);
        let response = self.get(&url, id).await?;

        let body: AnalysisResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let analysis = AudioAnalysis::from(body);

        tracing::debug!(
            track_id = %id,
            bars = analysis.bars.len(),
            sections = analysis.sections.len(),
            "Analysis fetched"
        );

        Ok(analysis)
    }
}
