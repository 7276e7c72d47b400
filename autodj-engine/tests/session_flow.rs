//! Session watch loop driving simulated decks through full transitions

use std::sync::{Arc, Mutex};

use autodj_common::config::{DeckConfig, DjConfig};
use autodj_common::events::{DeckId, DjEvent, EventBus};
use autodj_engine::bandit::MemoryWeightStore;
use autodj_engine::deck::simulated::SimulatedFactory;
use autodj_engine::deck::{control, DeckGraph, GraphDeckControl, SharedDeckGraph};
use autodj_engine::services::StaticTrackService;
use autodj_engine::session::{DjSession, SessionDeps};
use autodj_engine::types::{AudioFeatures, TrackRef};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};

fn track(id: &str) -> TrackRef {
    TrackRef {
        id: id.to_string(),
        uri: format!("sim:{}", id),
        name: id.to_uppercase(),
        artists: vec!["Sim".to_string()],
        duration_ms: 60_000,
    }
}

fn features(id: &str, tempo: f64, energy: f64, key: i32, mode: i32) -> AudioFeatures {
    AudioFeatures {
        id: id.to_string(),
        tempo,
        key: Some(key),
        mode: Some(mode),
        energy,
        danceability: 0.5,
        loudness: -8.0,
    }
}

struct Rig {
    session: DjSession,
    graph: SharedDeckGraph,
    rx: broadcast::Receiver<DjEvent>,
}

async fn rig(factory: SimulatedFactory) -> Rig {
    let events = Arc::new(EventBus::new(256));
    let graph: SharedDeckGraph = Arc::new(Mutex::new(DeckGraph::new(
        DeckConfig::default(),
        events.clone(),
    )));

    let service = StaticTrackService::new()
        .with_features(features("t1", 122.0, 0.7, 9, 0))
        .with_features(features("t2", 124.0, 0.68, 9, 0))
        .with_features(features("t3", 90.0, 0.2, 1, 1));

    let deps = SessionDeps {
        service: Arc::new(service),
        controls: Arc::new(GraphDeckControl::new(graph.clone(), Arc::new(factory))),
        weights: Arc::new(MemoryWeightStore::new()),
        events: events.clone(),
    };
    let session = DjSession::with_seed(&DjConfig::default(), deps, 11).await;

    session
        .set_pool(vec![track("t1"), track("t2"), track("t3")])
        .await;
    assert_eq!(session.enrich_pool().await, 3);

    Rig {
        session,
        graph,
        rx: events.subscribe(),
    }
}

fn drain(rx: &mut broadcast::Receiver<DjEvent>) -> Vec<DjEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, DjEvent::Beat { .. }) {
            out.push(event);
        }
    }
    out
}

fn current_id(session_current: Option<autodj_engine::types::EnrichedTrack>) -> Option<String> {
    session_current.map(|t| t.id().to_string())
}

#[tokio::test(start_paused = true)]
async fn test_full_transition_moves_to_compatible_track() {
    let mut rig = rig(SimulatedFactory::new()).await;

    let np = rig.session.start_playback(Some("t1")).await.unwrap();
    assert_eq!(np.camelot.as_deref(), Some("8A"));
    assert_eq!(control::lock(&rig.graph).dominant_deck(), DeckId::B);

    // 30s left: not yet
    sleep(Duration::from_secs(30)).await;
    assert!(rig.session.tick().await.is_none());

    // 24s left
    sleep(Duration::from_secs(6)).await;
    let id = rig.session.tick().await.expect("transition scheduled");
    assert!(rig.session.tick().await.is_none());

    rig.session.join_transition().await;
    assert!(!rig.session.is_transition_in_flight());
    assert_eq!(current_id(rig.session.current().await), Some("t2".to_string()));

    let events = drain(&mut rig.rx);
    let scheduled = events.iter().find_map(|e| match e {
        DjEvent::TransitionScheduled {
            transition_id,
            to_track_id,
            delay_ms,
            fade_ms,
            style,
            ..
        } => Some((*transition_id, to_track_id.clone(), *delay_ms, *fade_ms, style.clone())),
        _ => None,
    });
    let (transition_id, to, delay_ms, fade_ms, style) = scheduled.expect("scheduled event");
    assert_eq!(transition_id, id);
    assert_eq!(to, "t2");
    // bar-aligned, at most one 122 BPM bar past the 500ms lead
    assert!(delay_ms >= 500 && delay_ms <= 500 + 1_968);
    assert_eq!(fade_ms, 12_960);
    assert!(["straight_xfade", "filter_sweep", "echo_out"].contains(&style.as_str()));

    assert!(events.iter().any(|e| matches!(
        e,
        DjEvent::CrossfadeComplete { track_id, .. } if track_id == "t2"
    )));
    assert!(matches!(
        events.last(),
        Some(DjEvent::NowPlaying { now_playing, .. }) if now_playing.track_id == "t2"
    ));

    let g = control::lock(&rig.graph);
    assert_eq!(g.dominant_deck(), DeckId::A);
    assert!((g.deck(DeckId::A).gain() - 1.0).abs() < 1e-6);
    assert!(g.deck(DeckId::B).gain() < 1e-3);
    assert_eq!(g.deck(DeckId::A).current().map(|t| t.id()), Some("t2"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_keeps_outgoing_and_retries_elsewhere() {
    let mut rig = rig(SimulatedFactory::new().fail_uri("sim:t2")).await;

    rig.session.start_playback(Some("t1")).await.unwrap();
    sleep(Duration::from_secs(40)).await;

    assert!(rig.session.tick().await.is_some());
    rig.session.join_transition().await;

    assert_eq!(current_id(rig.session.current().await), Some("t1".to_string()));
    {
        let g = control::lock(&rig.graph);
        assert_eq!(g.dominant_deck(), DeckId::B);
        assert!((g.deck(DeckId::B).gain() - 1.0).abs() < 1e-6);
    }
    let events = drain(&mut rig.rx);
    assert!(events.iter().any(|e| matches!(
        e,
        DjEvent::TransitionFailed { track_id, .. } if track_id == "t2"
    )));

    // the failed track is not offered again
    assert!(rig.session.tick().await.is_some());
    rig.session.join_transition().await;
    assert_eq!(current_id(rig.session.current().await), Some("t3".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_skip_mid_fade_snaps_incoming_on_air() {
    let mut rig = rig(SimulatedFactory::new()).await;

    rig.session.start_playback(Some("t1")).await.unwrap();
    sleep(Duration::from_secs(36)).await;
    rig.session.tick().await.unwrap();

    // bar wait is under 2.5s; this lands inside the 12.96s fade
    sleep(Duration::from_secs(6)).await;
    assert_eq!(rig.session.skip().await.unwrap(), None);

    assert!(!rig.session.is_transition_in_flight());
    assert_eq!(current_id(rig.session.current().await), Some("t2".to_string()));
    let g = control::lock(&rig.graph);
    assert!((g.deck(DeckId::A).gain() - 1.0).abs() < 1e-6);

    drop(g);
    assert!(!drain(&mut rig.rx)
        .iter()
        .any(|e| matches!(e, DjEvent::CrossfadeComplete { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_rendered_audio_reaches_beat_probe() {
    let rig = rig(SimulatedFactory::new().with_tempo("sim:t1", 120.0)).await;
    let mut beats = rig
        .session
        .events()
        .subscribe_topic(autodj_common::events::EventTopic::Beat);

    rig.session.start_playback(Some("t1")).await.unwrap();

    let mut buffer = vec![0.0f32; 1_024];
    let levels = {
        let mut g = control::lock(&rig.graph);
        g.render(&mut buffer);
        g.sample_beats()
    };

    // click at the start of the first beat, full gain on deck B
    assert!((buffer[0] - 0.4).abs() < 1e-6);
    assert_eq!(levels[1].0, DeckId::B);
    assert!((levels[1].1 - 0.8).abs() < 1e-5);

    match beats.try_recv().unwrap() {
        DjEvent::Beat { deck, level } => {
            assert_eq!(deck, DeckId::B);
            assert!((level - 0.8).abs() < 1e-5);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_transition_silences_both_decks() {
    let rig = rig(SimulatedFactory::new()).await;

    rig.session.start_playback(Some("t1")).await.unwrap();
    sleep(Duration::from_secs(36)).await;
    rig.session.tick().await.unwrap();
    rig.session.join_transition().await;
    {
        // t1 is still loaded on the outgoing deck
        let g = control::lock(&rig.graph);
        assert_eq!(g.deck(DeckId::B).current().map(|t| t.id()), Some("t1"));
    }

    rig.session.stop().await.unwrap();

    let mut buffer = vec![0.0f32; 4_096];
    let mut g = control::lock(&rig.graph);
    g.render(&mut buffer);
    let peak = buffer.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert_eq!(peak, 0.0);
    assert!(!g.deck(DeckId::A).is_loaded());
    assert!(!g.deck(DeckId::B).is_loaded());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_plays_again() {
    let rig = rig(SimulatedFactory::new()).await;

    rig.session.start_playback(Some("t1")).await.unwrap();
    rig.session.stop().await.unwrap();
    rig.session.start_playback(Some("t2")).await.unwrap();

    let mut buffer = vec![0.0f32; 1_024];
    let mut g = control::lock(&rig.graph);
    g.render(&mut buffer);
    // click at the start of the first beat, full gain
    assert!((buffer[0] - 0.4).abs() < 1e-6);
    let on_air = g.dominant_deck();
    assert_eq!(g.deck(on_air).current().map(|t| t.id()), Some("t2"));
}
