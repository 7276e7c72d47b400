//! DJ session: pool, now-playing state and the watch loop
//!
//! A [`DjSession`] owns every engine component and is the only place that
//! decides when to transition. Each tick asks [`should_plan`] whether the
//! track on air is close enough to its end; if so the session picks the
//! next track, plans the transition, lets the style selector choose how it
//! should sound, and hands the plan to the executor on its own task.
//!
//! At most one transition is in flight. The latch is taken before planning
//! and released only after the executor resolves, whatever the outcome.

use crate::analyzer::AudioAnalyzer;
use crate::bandit::{Feedback, StyleSelector, TransitionContext, TransitionStyle, WeightStore};
use crate::error::{Error, Result};
use crate::executor::{DeckControl, TransitionExecutor, TransitionOutcome};
use crate::feature_store::FeatureStore;
use crate::planner::TransitionPlanner;
use crate::services::TrackService;
use crate::types::{AudioFeatures, EnrichedTrack, TrackRef, TransitionPlan};
use autodj_common::config::{DjConfig, SessionConfig};
use autodj_common::events::{DjEvent, EventBus, NowPlaying};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Whether the watch loop should plan a transition now
///
/// True once less than `threshold_ms` of the current track remains, as long
/// as the position is known, the duration is known, and nothing is in flight.
pub fn should_plan(
    position_ms: Option<u64>,
    duration_ms: u64,
    threshold_ms: u64,
    in_flight: bool,
) -> bool {
    if in_flight || duration_ms == 0 {
        return false;
    }
    match position_ms {
        Some(pos) => duration_ms.saturating_sub(pos) < threshold_ms,
        None => false,
    }
}

/// Collaborators a session drives
pub struct SessionDeps {
    pub service: Arc<dyn TrackService>,
    pub controls: Arc<dyn DeckControl>,
    pub weights: Arc<dyn WeightStore>,
    /// Shared with the deck graph so beat samples land on the same bus
    pub events: Arc<EventBus>,
}

#[derive(Default)]
struct SessionState {
    pool: Vec<EnrichedTrack>,
    current: Option<EnrichedTrack>,
    now_playing: Option<NowPlaying>,
    /// Tracks whose transition failed; skipped by later picks
    failed: HashSet<String>,
    last_rated: Option<Instant>,
    pool_exhausted: bool,
    playing: bool,
}

struct ActiveTransition {
    id: Uuid,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// State the transition task shares with the session
struct Shared {
    events: Arc<EventBus>,
    controls: Arc<dyn DeckControl>,
    executor: TransitionExecutor,
    state: RwLock<SessionState>,
    in_flight: AtomicBool,
    active: StdMutex<Option<ActiveTransition>>,
}

impl Shared {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTransition>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_transition(&self, plan: TransitionPlan, cancel: CancellationToken) {
        let result = self
            .executor
            .schedule_transition(&plan, self.controls.as_ref(), &cancel)
            .await;

        match result {
            Ok(TransitionOutcome::Completed) | Ok(TransitionOutcome::Interrupted) => {
                self.advance(plan.next).await;
            }
            Ok(TransitionOutcome::Cancelled) => {
                debug!(transition_id = %plan.id, "Transition dropped before start");
            }
            Err(e) => {
                warn!(
                    transition_id = %plan.id,
                    track_id = %plan.next.id(),
                    error = %e,
                    "Transition failed; excluding track from selection"
                );
                self.state
                    .write()
                    .await
                    .failed
                    .insert(plan.next.id().to_string());
            }
        }

        {
            let mut active = self.lock_active();
            if active.as_ref().map_or(false, |a| a.id == plan.id) {
                *active = None;
            }
        }
        self.in_flight.store(false, Ordering::Release);
    }

    /// Put `track` on air in the session state and announce it
    async fn advance(&self, track: EnrichedTrack) {
        let now_playing = track.now_playing();
        {
            let mut state = self.state.write().await;
            state.current = Some(track);
            state.now_playing = Some(now_playing.clone());
        }

        info!(
            track_id = %now_playing.track_id,
            bpm = now_playing.bpm,
            energy = now_playing.energy,
            camelot = ?now_playing.camelot,
            "Now playing"
        );
        self.events.emit_lossy(DjEvent::NowPlaying {
            now_playing,
            timestamp: autodj_common::time::now(),
        });
    }
}

pub struct DjSession {
    config: SessionConfig,
    shared: Arc<Shared>,
    store: FeatureStore,
    planner: TransitionPlanner,
    selector: Mutex<StyleSelector>,
    rng: StdMutex<StdRng>,
}

impl DjSession {
    pub async fn new(config: &DjConfig, deps: SessionDeps) -> Self {
        Self::build(config, deps, None).await
    }

    /// Session whose random choices are reproducible
    pub async fn with_seed(config: &DjConfig, deps: SessionDeps, seed: u64) -> Self {
        Self::build(config, deps, Some(seed)).await
    }

    async fn build(config: &DjConfig, deps: SessionDeps, seed: Option<u64>) -> Self {
        let rng = |offset: u64| match seed {
            Some(s) => StdRng::seed_from_u64(s.wrapping_add(offset)),
            None => StdRng::from_entropy(),
        };

        let selector = StyleSelector::load_with_rng(deps.weights, &config.bandit, rng(2)).await;
        let executor =
            TransitionExecutor::with_rng(config.executor.clone(), deps.events.clone(), rng(1));

        Self {
            config: config.session.clone(),
            shared: Arc::new(Shared {
                events: deps.events,
                controls: deps.controls,
                executor,
                state: RwLock::new(SessionState::default()),
                in_flight: AtomicBool::new(false),
                active: StdMutex::new(None),
            }),
            store: FeatureStore::new(deps.service, &config.feature_store),
            planner: TransitionPlanner::new(config.planner.clone()),
            selector: Mutex::new(selector),
            rng: StdMutex::new(rng(0)),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.shared.events.clone()
    }

    pub fn feature_store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn planner(&self) -> &TransitionPlanner {
        &self.planner
    }

    pub fn is_transition_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub async fn now_playing(&self) -> Option<NowPlaying> {
        self.shared.state.read().await.now_playing.clone()
    }

    pub async fn current(&self) -> Option<EnrichedTrack> {
        self.shared.state.read().await.current.clone()
    }

    pub async fn pool(&self) -> Vec<EnrichedTrack> {
        self.shared.state.read().await.pool.clone()
    }

    /// Style the next feedback would reward
    pub async fn last_style(&self) -> Option<TransitionStyle> {
        self.selector.lock().await.last_style()
    }

    /// Replace the track pool, using whatever enrichment is already cached
    pub async fn set_pool(&self, tracks: Vec<TrackRef>) {
        let pool = self.store.enrich_all(&tracks).await;
        let mut state = self.shared.state.write().await;
        info!(tracks = pool.len(), "Track pool set");
        state.pool = pool;
        state.pool_exhausted = false;
    }

    /// Fetch features (and analysis for a prefix) for the pool
    ///
    /// Returns how many tracks ended up with features.
    pub async fn enrich_pool(&self) -> usize {
        let tracks: Vec<TrackRef> = self
            .shared
            .state
            .read()
            .await
            .pool
            .iter()
            .map(|t| t.track.clone())
            .collect();

        let enriched = self.store.enrich_pool(&tracks).await;
        let featured = enriched.iter().filter(|t| t.features.is_some()).count();

        let mut state = self.shared.state.write().await;
        let fresh = state
            .current
            .as_ref()
            .and_then(|c| enriched.iter().find(|t| t.id() == c.id()).cloned());
        if fresh.is_some() {
            state.current = fresh;
        }
        state.pool = enriched;
        featured
    }

    /// Estimate features for a track from its audio and cache them
    pub async fn analyze_track(
        &self,
        track_id: &str,
        samples: &[f32],
        analyzer: &dyn AudioAnalyzer,
    ) -> Result<AudioFeatures> {
        let features = analyzer.analyze(samples)?.into_features(track_id);
        self.store.insert_features(features.clone()).await;

        let mut state = self.shared.state.write().await;
        let tracks: Vec<TrackRef> = state.pool.iter().map(|t| t.track.clone()).collect();
        state.pool = self.store.enrich_all(&tracks).await;
        Ok(features)
    }

    /// Start the session on `track_id` (or the first pool track)
    pub async fn start_playback(&self, track_id: Option<&str>) -> Result<NowPlaying> {
        self.cancel_transition().await;

        let track = {
            let state = self.shared.state.read().await;
            match track_id {
                Some(id) => state.pool.iter().find(|t| t.id() == id).cloned(),
                None => state.pool.first().cloned(),
            }
        }
        .ok_or_else(|| Error::InvalidState("no track to start with".to_string()))?;

        let controls = &self.shared.controls;
        controls.prepare(&track);
        controls.play_track(&track.track.uri, 0).await?;
        controls.set_volume(1.0).await?;

        let now_playing = track.now_playing();
        self.shared.advance(track).await;
        self.set_playing(true).await;
        Ok(now_playing)
    }

    /// Cancel any pending transition and stop both decks
    pub async fn stop(&self) -> Result<()> {
        self.cancel_transition().await;
        self.shared.controls.silence().await?;

        {
            let mut state = self.shared.state.write().await;
            state.current = None;
            state.now_playing = None;
        }
        self.set_playing(false).await;
        Ok(())
    }

    async fn set_playing(&self, playing: bool) {
        self.shared.state.write().await.playing = playing;
        info!(playing, "Transport changed");
        self.shared.events.emit_lossy(DjEvent::TransportChanged {
            playing,
            timestamp: autodj_common::time::now(),
        });
    }

    /// One watch-loop step; returns the ID of a newly scheduled transition
    pub async fn tick(&self) -> Option<Uuid> {
        if self.is_transition_in_flight() {
            return None;
        }

        let (current, exhausted) = {
            let state = self.shared.state.read().await;
            if !state.playing {
                return None;
            }
            (state.current.clone()?, state.pool_exhausted)
        };

        let position = self.shared.controls.position_ms();
        if exhausted && position.map_or(false, |pos| pos >= current.duration_ms()) {
            info!(track_id = %current.id(), "Last track ended with no successor; stopping");
            if let Err(e) = self.stop().await {
                warn!(error = %e, "Failed to stop after pool exhaustion");
            }
            return None;
        }

        if !should_plan(
            position,
            current.duration_ms(),
            self.config.plan_threshold_ms,
            false,
        ) {
            return None;
        }

        self.schedule(current, false).await
    }

    /// Move on from the current track now
    ///
    /// A pending transition is cancelled first. If it was already fading,
    /// the incoming track is snapped on air and that counts as the skip;
    /// otherwise a new transition is scheduled to start immediately.
    pub async fn skip(&self) -> Result<Option<Uuid>> {
        let before = self.current().await.map(|t| t.id().to_string());

        if self.cancel_transition().await {
            let after = self.current().await.map(|t| t.id().to_string());
            if after != before {
                return Ok(None);
            }
        }

        let current = self
            .current()
            .await
            .ok_or_else(|| Error::InvalidState("nothing is playing".to_string()))?;
        Ok(self.schedule(current, true).await)
    }

    async fn schedule(&self, current: EnrichedTrack, immediate: bool) -> Option<Uuid> {
        if self
            .shared
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let next = {
            let mut state = self.shared.state.write().await;
            let candidates: Vec<EnrichedTrack> = state
                .pool
                .iter()
                .filter(|t| !state.failed.contains(t.id()))
                .cloned()
                .collect();

            let picked = {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.planner.pick_next_track(&current, &candidates, &mut *rng)
            };

            match picked {
                Some(next) => {
                    state.pool_exhausted = false;
                    next
                }
                None => {
                    if !state.pool_exhausted {
                        warn!(current = %current.id(), "No next track available");
                        state.pool_exhausted = true;
                        self.shared.events.emit_lossy(DjEvent::PoolExhausted {
                            current_track_id: current.id().to_string(),
                            timestamp: autodj_common::time::now(),
                        });
                    }
                    self.shared.in_flight.store(false, Ordering::Release);
                    return None;
                }
            }
        };

        let controls = self.shared.controls.clone();
        let position = move || controls.position_ms();
        let mut plan = self.planner.compute_transition(&current, &next, &position);
        if immediate {
            plan.at = Instant::now();
        }

        let context = TransitionContext::between(&current, &next, plan.outro_start_ms);
        let style = {
            let mut selector = self.selector.lock().await;
            let epsilon = selector.epsilon();
            selector.pick_action(&context, epsilon)
        };

        let delay_ms = plan.delay_ms(Instant::now());
        info!(
            transition_id = %plan.id,
            from = %current.id(),
            to = %next.id(),
            style = %style,
            delay_ms,
            fade_ms = plan.fade_ms,
            reason = %plan.reason,
            "Transition scheduled"
        );
        self.shared.events.emit_lossy(DjEvent::TransitionScheduled {
            transition_id: plan.id,
            from_track_id: current.id().to_string(),
            to_track_id: next.id().to_string(),
            delay_ms,
            fade_ms: plan.fade_ms,
            start_cue_ms: plan.start_cue_ms,
            style: style.as_str().to_string(),
            reason: plan.reason.clone(),
            timestamp: autodj_common::time::now(),
        });

        let id = plan.id;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let shared = self.shared.clone();

        // slot is filled before the task can try to clear it
        let mut active = self.shared.lock_active();
        let handle = tokio::spawn(async move {
            shared.run_transition(plan, task_cancel).await;
        });
        *active = Some(ActiveTransition {
            id,
            cancel,
            handle: Some(handle),
        });

        Some(id)
    }

    /// Wait for the in-flight transition, if any, to resolve
    pub async fn join_transition(&self) {
        let handle = self
            .shared
            .lock_active()
            .as_mut()
            .and_then(|a| a.handle.take());

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Transition task panicked");
            }
        }
    }

    /// Cancel the in-flight transition and wait for it; false when none
    pub async fn cancel_transition(&self) -> bool {
        let active = self.shared.lock_active().take();
        let Some(active) = active else {
            return false;
        };

        debug!(transition_id = %active.id, "Cancelling transition");
        active.cancel.cancel();
        if let Some(handle) = active.handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Transition task panicked");
            }
        }
        true
    }

    /// Reward the last style decision
    ///
    /// Like and dislike share a cooldown; presses inside it are ignored and
    /// return `None`. Applause is never rate-limited.
    pub async fn submit_feedback(&self, feedback: Feedback) -> Result<Option<TransitionStyle>> {
        if matches!(feedback, Feedback::Like | Feedback::Dislike) {
            let now = Instant::now();
            let cooldown = Duration::from_millis(self.config.feedback_cooldown_ms);

            let mut state = self.shared.state.write().await;
            if let Some(last) = state.last_rated {
                if now.duration_since(last) < cooldown {
                    debug!(?feedback, "Feedback ignored during cooldown");
                    return Ok(None);
                }
            }
            state.last_rated = Some(now);
        }

        self.selector.lock().await.send_reward(feedback).await
    }

    /// Tick until `cancel` fires, then cancel any pending transition
    pub async fn run(&self, cancel: CancellationToken) {
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_ms = period.as_millis() as u64, "Watch loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.cancel_transition().await;
        info!("Watch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::MemoryWeightStore;
    use crate::services::StaticTrackService;
    use autodj_common::events::EventTopic;
    use std::sync::Mutex as SyncMutex;

    #[test]
    fn test_should_plan_threshold() {
        assert!(should_plan(Some(180_000), 200_000, 25_000, false));
        assert!(!should_plan(Some(175_000), 200_000, 25_000, false));
        assert!(!should_plan(Some(180_000), 200_000, 25_000, true));
        assert!(!should_plan(None, 200_000, 25_000, false));
        assert!(!should_plan(Some(10), 0, 25_000, false));
        // past the end still counts
        assert!(should_plan(Some(210_000), 200_000, 25_000, false));
    }

    /// Deck that starts instantly and reports a settable position
    struct StubDeck {
        position: SyncMutex<Option<u64>>,
        volume: SyncMutex<Option<f32>>,
        plays: SyncMutex<Vec<String>>,
    }

    impl StubDeck {
        fn new() -> Self {
            Self {
                position: SyncMutex::new(Some(0)),
                volume: SyncMutex::new(Some(0.0)),
                plays: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl DeckControl for StubDeck {
        async fn play_track(&self, uri: &str, _cue_ms: u64) -> Result<()> {
            self.plays.lock().unwrap().push(uri.to_string());
            Ok(())
        }

        async fn set_volume(&self, volume: f32) -> Result<()> {
            *self.volume.lock().unwrap() = Some(volume);
            Ok(())
        }

        async fn silence(&self) -> Result<()> {
            *self.volume.lock().unwrap() = Some(0.0);
            Ok(())
        }

        fn volume(&self) -> Option<f32> {
            *self.volume.lock().unwrap()
        }

        fn position_ms(&self) -> Option<u64> {
            *self.position.lock().unwrap()
        }
    }

    fn track(id: &str) -> TrackRef {
        TrackRef {
            id: id.to_string(),
            uri: format!("uri:{}", id),
            name: id.to_string(),
            artists: vec![],
            duration_ms: 120_000,
        }
    }

    async fn session(deck: Arc<StubDeck>) -> DjSession {
        let deps = SessionDeps {
            service: Arc::new(StaticTrackService::new()),
            controls: deck,
            weights: Arc::new(MemoryWeightStore::new()),
            events: Arc::new(EventBus::new(64)),
        };
        DjSession::with_seed(&DjConfig::default(), deps, 7).await
    }

    #[tokio::test]
    async fn test_start_requires_pool() {
        let s = session(Arc::new(StubDeck::new())).await;
        assert!(matches!(
            s.start_playback(None).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_start_playback_publishes_now_playing() {
        let deck = Arc::new(StubDeck::new());
        let s = session(deck.clone()).await;
        let mut rx = s.events().subscribe();

        s.set_pool(vec![track("a"), track("b")]).await;
        let np = s.start_playback(Some("b")).await.unwrap();

        assert_eq!(np.track_id, "b");
        assert_eq!(np.bpm, 120.0);
        assert_eq!(np.energy, 0.5);
        assert_eq!(deck.plays.lock().unwrap().as_slice(), ["uri:b"]);
        assert_eq!(deck.volume(), Some(1.0));
        assert_eq!(s.now_playing().await.map(|n| n.track_id), Some("b".to_string()));

        assert!(matches!(rx.try_recv().unwrap(), DjEvent::NowPlaying { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            DjEvent::TransportChanged { playing: true, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_waits_for_threshold_and_latches() {
        let deck = Arc::new(StubDeck::new());
        let s = session(deck.clone()).await;
        s.set_pool(vec![track("a"), track("b")]).await;
        s.start_playback(Some("a")).await.unwrap();

        assert!(s.tick().await.is_none());

        *deck.position.lock().unwrap() = Some(100_000);
        let first = s.tick().await;
        assert!(first.is_some());
        assert!(s.is_transition_in_flight());
        assert!(s.tick().await.is_none());

        s.join_transition().await;
        assert!(!s.is_transition_in_flight());
        assert_eq!(s.current().await.map(|t| t.id().to_string()), Some("b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feedback_cooldown() {
        let deck = Arc::new(StubDeck::new());
        let s = session(deck.clone()).await;
        s.set_pool(vec![track("a"), track("b")]).await;
        s.start_playback(Some("a")).await.unwrap();
        *deck.position.lock().unwrap() = Some(100_000);
        s.tick().await.unwrap();

        let style = s.last_style().await;
        assert!(style.is_some());

        assert_eq!(s.submit_feedback(Feedback::Like).await.unwrap(), style);
        // inside the 3s window
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(s.submit_feedback(Feedback::Dislike).await.unwrap(), None);
        // applause is exempt
        assert_eq!(s.submit_feedback(Feedback::Applause).await.unwrap(), style);

        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(s.submit_feedback(Feedback::Dislike).await.unwrap(), style);

        s.cancel_transition().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_when_idle_starts_now() {
        let deck = Arc::new(StubDeck::new());
        let s = session(deck.clone()).await;
        s.set_pool(vec![track("a"), track("b")]).await;
        s.start_playback(Some("a")).await.unwrap();

        let began = Instant::now();
        assert!(s.skip().await.unwrap().is_some());
        s.join_transition().await;

        assert_eq!(s.current().await.map(|t| t.id().to_string()), Some("b".to_string()));
        // 9s fallback fade lifted to the 12s headroom minimum; no bar wait
        assert_eq!((Instant::now() - began).as_millis(), 12_000);
    }

    #[tokio::test]
    async fn test_stop_clears_now_playing() {
        let deck = Arc::new(StubDeck::new());
        let s = session(deck.clone()).await;
        s.set_pool(vec![track("a")]).await;
        s.start_playback(None).await.unwrap();

        s.stop().await.unwrap();
        assert!(s.now_playing().await.is_none());
        assert_eq!(deck.volume(), Some(0.0));
        assert!(s.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_single_track_pool_reports_exhaustion_then_stops() {
        let deck = Arc::new(StubDeck::new());
        let s = session(deck.clone()).await;
        s.set_pool(vec![track("only")]).await;
        s.start_playback(None).await.unwrap();
        let mut rx = s.events().subscribe_topic(EventTopic::Transition);

        *deck.position.lock().unwrap() = Some(100_000);
        assert!(s.tick().await.is_none());
        assert!(!s.is_transition_in_flight());
        assert!(matches!(
            rx.try_recv().unwrap(),
            DjEvent::PoolExhausted { current_track_id, .. } if current_track_id == "only"
        ));

        // announced once
        assert!(s.tick().await.is_none());
        assert!(rx.try_recv().is_err());

        let mut transport = s.events().subscribe_topic(EventTopic::Transport);
        *deck.position.lock().unwrap() = Some(120_000);
        assert!(s.tick().await.is_none());
        assert!(s.now_playing().await.is_none());
        assert_eq!(deck.volume(), Some(0.0));
        assert!(matches!(
            transport.try_recv().unwrap(),
            DjEvent::TransportChanged { playing: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_new_pool_clears_exhaustion() {
        let deck = Arc::new(StubDeck::new());
        let s = session(deck.clone()).await;
        s.set_pool(vec![track("only")]).await;
        s.start_playback(None).await.unwrap();

        *deck.position.lock().unwrap() = Some(100_000);
        assert!(s.tick().await.is_none());

        s.set_pool(vec![track("only"), track("more")]).await;
        *deck.position.lock().unwrap() = Some(120_000);
        assert!(s.tick().await.is_some());
        s.cancel_transition().await;
        assert!(s.now_playing().await.is_some());
    }

    #[tokio::test]
    async fn test_analyzed_features_reach_pool() {
        let s = session(Arc::new(StubDeck::new())).await;
        s.set_pool(vec![track("local")]).await;

        let mut samples = vec![0.0f32; 22_050 * 6];
        for i in 0..6 {
            samples[i * 22_050] = 0.9;
        }
        let features = s
            .analyze_track("local", &samples, &crate::analyzer::HeuristicAnalyzer::default())
            .await
            .unwrap();

        assert_eq!(features.tempo, 120.0);
        let pool = s.pool().await;
        assert_eq!(pool[0].features.as_ref().map(|f| f.tempo), Some(120.0));
    }
}
