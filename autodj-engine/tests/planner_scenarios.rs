//! Next-track selection and transition timing, end to end through the
//! feature store

use std::sync::Arc;

use autodj_common::config::{FeatureStoreConfig, PlannerConfig};
use autodj_engine::feature_store::FeatureStore;
use autodj_engine::planner::TransitionPlanner;
use autodj_engine::services::StaticTrackService;
use autodj_engine::types::{AudioAnalysis, AudioFeatures, EnrichedTrack, Section, TrackRef};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{Duration, Instant};

fn track(id: &str, duration_ms: u64) -> TrackRef {
    TrackRef {
        id: id.to_string(),
        uri: format!("spotify:track:{}", id),
        name: id.to_string(),
        artists: vec!["Test".to_string()],
        duration_ms,
    }
}

fn features(id: &str, tempo: f64, energy: f64, key: i32, mode: i32) -> AudioFeatures {
    AudioFeatures {
        id: id.to_string(),
        tempo,
        key: Some(key),
        mode: Some(mode),
        energy,
        danceability: 0.6,
        loudness: -7.0,
    }
}

async fn enriched(service: StaticTrackService, tracks: &[TrackRef]) -> Vec<EnrichedTrack> {
    let store = FeatureStore::new(Arc::new(service), &FeatureStoreConfig::default());
    store.enrich_pool(tracks).await
}

#[tokio::test]
async fn test_compatible_close_tempo_candidate_is_picked() {
    // 8A = A minor (9, 0); 3B = D-flat major (1, 1)
    let service = StaticTrackService::new()
        .with_features(features("current", 122.0, 0.7, 9, 0))
        .with_features(features("close", 124.0, 0.68, 9, 0))
        .with_features(features("far", 90.0, 0.2, 1, 1));
    let tracks = vec![
        track("current", 200_000),
        track("close", 200_000),
        track("far", 200_000),
    ];

    let pool = enriched(service, &tracks).await;
    assert_eq!(pool[0].camelot.map(|c| c.to_string()).as_deref(), Some("8A"));
    assert_eq!(pool[2].camelot.map(|c| c.to_string()).as_deref(), Some("3B"));

    let planner = TransitionPlanner::new(PlannerConfig::default());
    let mut rng = StdRng::seed_from_u64(1);
    let next = planner
        .pick_next_track(&pool[0], &pool[1..], &mut rng)
        .unwrap();
    assert_eq!(next.id(), "close");

    // order must not matter
    let reversed = vec![pool[2].clone(), pool[1].clone()];
    let next = planner.pick_next_track(&pool[0], &reversed, &mut rng).unwrap();
    assert_eq!(next.id(), "close");
}

#[tokio::test(start_paused = true)]
async fn test_plan_for_unanalyzed_track() {
    let service = StaticTrackService::new()
        .with_features(features("current", 128.0, 0.5, 0, 1))
        .with_features(features("next", 128.0, 0.5, 7, 1));
    let tracks = vec![track("current", 200_000), track("next", 240_000)];
    let pool = enriched(service, &tracks).await;

    let planner = TransitionPlanner::new(PlannerConfig::default());
    let outro = planner.outro_window(&pool[0]);
    // 200s - 24s, already before the 8s tail bound
    assert_eq!(outro.start_ms, 176_000);
    assert_eq!(outro.headroom_ms, 24_000);
    assert_eq!(outro.min_fade_ms, 12_000);

    let now = Instant::now();
    let plan = planner.compute_transition(&pool[0], &pool[1], &|| Some(170_000u64));

    // one 128 BPM bar = 1875 ms
    assert_eq!(plan.start_cue_ms, 1_875);
    assert!(plan.start_cue_ms <= 15_000);
    assert!(plan.fade_ms >= plan.min_fade_ms);
    assert_eq!(plan.fade_ms, 12_000);

    // earliest is 176s; the 128 BPM grid has a bar exactly at 176.25s
    assert!(plan.at >= now + Duration::from_millis(500));
    assert_eq!(plan.at - now, Duration::from_millis(6_250));
}

#[tokio::test(start_paused = true)]
async fn test_late_final_section_hits_tail_bound() {
    let analysis = AudioAnalysis {
        bars: (0..100).map(|i| i as f64 * 2.0).collect(),
        sections: vec![
            Section {
                start: 0.0,
                duration: 12.0,
                loudness: None,
                confidence: None,
            },
            Section {
                start: 196.0,
                duration: 4.0,
                loudness: None,
                confidence: None,
            },
        ],
        beats: vec![],
    };
    let service = StaticTrackService::new()
        .with_features(features("current", 120.0, 0.5, 0, 1))
        .with_analysis("current", analysis)
        .with_features(features("next", 120.0, 0.5, 0, 1));
    let tracks = vec![track("current", 200_000), track("next", 200_000)];
    let pool = enriched(service, &tracks).await;

    let planner = TransitionPlanner::new(PlannerConfig::default());
    let outro = planner.outro_window(&pool[0]);
    assert_eq!(outro.start_ms, 192_000);
    assert_eq!(outro.headroom_ms, 8_000);
    assert_eq!(outro.min_fade_ms, 8_000);

    let now = Instant::now();
    let plan = planner.compute_transition(&pool[0], &pool[1], &|| Some(185_000u64));
    // first analysis bar at or after 192s
    assert_eq!(plan.at - now, Duration::from_millis(7_000));
    assert_eq!(plan.outro_start_ms, 192_000);
}
