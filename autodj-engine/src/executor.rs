//! Transition execution
//!
//! Drives one [`TransitionPlan`] against a [`DeckControl`]:
//! wait for `plan.at`, start the next track at its cue (bounded by a
//! timeout), drop it to a near-silent gain, then ramp it to full over a
//! fixed number of steps. Filter-sweep cues are published on the event bus
//! and never block the ramp.
//!
//! Each call governs exactly one transition. Cancellation before the start
//! leaves the decks untouched; cancellation mid-fade snaps the incoming deck
//! to full gain so nothing is left half-faded.

use crate::error::{Error, Result};
use crate::types::{EnrichedTrack, TransitionPlan};
use async_trait::async_trait;
use autodj_common::config::ExecutorConfig;
use autodj_common::events::{DjEvent, EventBus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, sleep_until, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Playback control surface used by the executor
///
/// `set_volume` addresses the deck being brought in. How the outgoing deck
/// follows is the backend's business (the deck graph keeps the two on an
/// equal-power law).
#[async_trait]
pub trait DeckControl: Send + Sync {
    /// Announce the track the next `play_track` call will start
    fn prepare(&self, _next: &EnrichedTrack) {}

    /// Start `uri` at `cue_ms` on the incoming deck
    async fn play_track(&self, uri: &str, cue_ms: u64) -> Result<()>;

    async fn set_volume(&self, volume: f32) -> Result<()>;

    /// Stop every deck; `set_volume(0.0)` only fades the incoming one
    async fn silence(&self) -> Result<()>;

    fn volume(&self) -> Option<f32>;

    /// Position of the track currently on air
    fn position_ms(&self) -> Option<u64>;
}

/// How a transition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Completed,
    /// Cancelled before the incoming track started; decks untouched
    Cancelled,
    /// Cancelled mid-fade; incoming deck snapped to full gain
    Interrupted,
}

pub struct TransitionExecutor {
    config: ExecutorConfig,
    events: Arc<EventBus>,
    rng: Mutex<StdRng>,
}

impl TransitionExecutor {
    pub fn new(config: ExecutorConfig, events: Arc<EventBus>) -> Self {
        Self::with_rng(config, events, StdRng::from_entropy())
    }

    /// Executor with a fixed RNG for the filter-sweep coin
    pub fn with_rng(config: ExecutorConfig, events: Arc<EventBus>, rng: StdRng) -> Self {
        Self {
            config,
            events,
            rng: Mutex::new(rng),
        }
    }

    /// Run `plan` to completion, cancellation, or failure
    pub async fn schedule_transition(
        &self,
        plan: &TransitionPlan,
        controls: &dyn DeckControl,
        cancel: &CancellationToken,
    ) -> Result<TransitionOutcome> {
        debug!(
            transition_id = %plan.id,
            delay_ms = plan.delay_ms(Instant::now()),
            "Waiting for transition start"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(transition_id = %plan.id, "Transition cancelled before start");
                return Ok(TransitionOutcome::Cancelled);
            }
            _ = sleep_until(plan.at) => {}
        }

        let prior_volume = controls.volume();
        controls.prepare(&plan.next);
        let start_timeout = Duration::from_millis(self.config.start_timeout_ms);

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.restore(controls, prior_volume).await;
                info!(transition_id = %plan.id, "Transition cancelled while starting");
                return Ok(TransitionOutcome::Cancelled);
            }
            r = timeout(start_timeout, controls.play_track(&plan.next.track.uri, plan.start_cue_ms)) => r,
        };

        let start_error = match started {
            Ok(Ok(())) => controls.set_volume(self.config.silent_gain).await.err(),
            Ok(Err(e)) => Some(e),
            Err(_) => Some(Error::DeckNotReady(format!(
                "playback did not start within {}ms",
                self.config.start_timeout_ms
            ))),
        };
        if let Some(e) = start_error {
            return Err(self.fail(plan, controls, prior_volume, e).await);
        }

        info!(
            transition_id = %plan.id,
            track_id = %plan.next.id(),
            cue_ms = plan.start_cue_ms,
            fade_ms = plan.fade_ms,
            "Transition started"
        );

        let sweep = {
            let mut rng = self.rng.lock().await;
            rng.gen_bool(self.config.filter_sweep_probability)
        };
        if sweep {
            let secs = self
                .config
                .max_start_sweep_secs
                .min(plan.fade_ms as f64 / 2000.0);
            self.emit_sweep(plan, secs);
        }

        let steps = self.config.fade_steps.max(1);
        let step = (Duration::from_millis(plan.fade_ms) / steps).max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + step, step);

        for i in 1..=steps {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = controls.set_volume(plan.gain_to).await {
                        warn!(transition_id = %plan.id, error = %e, "Failed to snap gain on cancel");
                    }
                    info!(transition_id = %plan.id, step = i, "Transition cancelled mid-fade");
                    return Ok(TransitionOutcome::Interrupted);
                }
                _ = ticker.tick() => {}
            }

            let gain = self
                .config
                .ramp_curve
                .ramp(self.config.silent_gain, i as f32 / steps as f32);
            if let Err(e) = controls.set_volume(gain).await {
                warn!(transition_id = %plan.id, step = i, error = %e, "Gain step failed");
            }

            if sweep && i == steps / 2 {
                self.emit_sweep(plan, self.config.mid_sweep_secs);
            }
        }

        self.events.emit_lossy(DjEvent::CrossfadeComplete {
            transition_id: plan.id,
            track_id: plan.next.id().to_string(),
            duration_secs: plan.fade_ms as f64 / 1000.0,
            timestamp: autodj_common::time::now(),
        });

        info!(transition_id = %plan.id, track_id = %plan.next.id(), "Crossfade complete");
        Ok(TransitionOutcome::Completed)
    }

    fn emit_sweep(&self, plan: &TransitionPlan, duration_secs: f64) {
        self.events.emit_lossy(DjEvent::FilterSweep {
            transition_id: plan.id,
            duration_secs,
            timestamp: autodj_common::time::now(),
        });
    }

    async fn restore(&self, controls: &dyn DeckControl, prior_volume: Option<f32>) {
        if let Some(v) = prior_volume {
            if let Err(e) = controls.set_volume(v).await {
                warn!(error = %e, "Failed to restore prior volume");
            }
        }
    }

    /// Leave the outgoing deck audible and report the failure
    async fn fail(
        &self,
        plan: &TransitionPlan,
        controls: &dyn DeckControl,
        prior_volume: Option<f32>,
        cause: Error,
    ) -> Error {
        self.restore(controls, prior_volume).await;

        warn!(
            transition_id = %plan.id,
            track_id = %plan.next.id(),
            error = %cause,
            "Transition failed; outgoing deck kept on air"
        );

        self.events.emit_lossy(DjEvent::TransitionFailed {
            transition_id: plan.id,
            track_id: plan.next.id().to_string(),
            reason: cause.to_string(),
            timestamp: autodj_common::time::now(),
        });

        match cause {
            Error::DeckNotReady(_) => cause,
            other => Error::DeckNotReady(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackRef;
    use autodj_common::events::EventTopic;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    #[derive(Clone, Copy, PartialEq)]
    enum StartBehavior {
        Ok,
        Fail,
        Hang,
    }

    struct FakeDeck {
        behavior: StartBehavior,
        origin: Instant,
        volume: StdMutex<Option<f32>>,
        volumes: StdMutex<Vec<(u64, f32)>>,
        plays: StdMutex<Vec<(u64, String, u64)>>,
    }

    impl FakeDeck {
        fn new(behavior: StartBehavior) -> Self {
            Self {
                behavior,
                origin: Instant::now(),
                volume: StdMutex::new(Some(0.8)),
                volumes: StdMutex::new(Vec::new()),
                plays: StdMutex::new(Vec::new()),
            }
        }

        fn elapsed_ms(&self) -> u64 {
            (Instant::now() - self.origin).as_millis() as u64
        }

        fn volumes(&self) -> Vec<(u64, f32)> {
            self.volumes.lock().unwrap().clone()
        }

        fn plays(&self) -> Vec<(u64, String, u64)> {
            self.plays.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeckControl for FakeDeck {
        async fn play_track(&self, uri: &str, cue_ms: u64) -> Result<()> {
            self.plays
                .lock()
                .unwrap()
                .push((self.elapsed_ms(), uri.to_string(), cue_ms));
            match self.behavior {
                StartBehavior::Ok => Ok(()),
                StartBehavior::Fail => Err(Error::Playback("device offline".to_string())),
                StartBehavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }

        async fn set_volume(&self, volume: f32) -> Result<()> {
            *self.volume.lock().unwrap() = Some(volume);
            self.volumes.lock().unwrap().push((self.elapsed_ms(), volume));
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
            Some(self.elapsed_ms())
        }
    }

    fn plan(delay_ms: u64, fade_ms: u64) -> TransitionPlan {
        TransitionPlan {
            id: Uuid::new_v4(),
            at: Instant::now() + Duration::from_millis(delay_ms),
            fade_ms,
            start_cue_ms: 16_000,
            gain_from: 0.0,
            gain_to: 1.0,
            reason: "test".to_string(),
            next: EnrichedTrack::bare(TrackRef {
                id: "next".to_string(),
                uri: "uri:next".to_string(),
                name: "Next".to_string(),
                artists: vec![],
                duration_ms: 200_000,
            }),
            outro_start_ms: 0,
            min_fade_ms: 8_000,
        }
    }

    fn executor(sweep_probability: f64, events: Arc<EventBus>) -> TransitionExecutor {
        let config = ExecutorConfig {
            filter_sweep_probability: sweep_probability,
            ..ExecutorConfig::default()
        };
        TransitionExecutor::with_rng(config, events, StdRng::seed_from_u64(42))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_fade_ramps_to_one() {
        let events = Arc::new(EventBus::new(64));
        let mut rx = events.subscribe_topic(EventTopic::Transition);
        let deck = FakeDeck::new(StartBehavior::Ok);
        let exec = executor(0.0, events.clone());

        let outcome = exec
            .schedule_transition(&plan(2_000, 12_000), &deck, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Completed);

        let plays = deck.plays();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0], (2_000, "uri:next".to_string(), 16_000));

        let volumes = deck.volumes();
        // silent start + 30 steps
        assert_eq!(volumes.len(), 31);
        assert!((volumes[0].1 - 0.0001).abs() < 1e-7);
        assert!(volumes[0].1 > 0.0);
        assert!((volumes[30].1 - 1.0).abs() < 1e-6);
        assert!(volumes.windows(2).all(|w| w[1].1 > w[0].1));
        assert_eq!(volumes[1].0, 2_400);
        assert_eq!(volumes[30].0, 14_000);

        match rx.try_recv().unwrap() {
            DjEvent::CrossfadeComplete { track_id, duration_secs, .. } => {
                assert_eq!(track_id, "next");
                assert_eq!(duration_secs, 12.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_touches_nothing() {
        let deck = FakeDeck::new(StartBehavior::Ok);
        let exec = executor(0.0, Arc::new(EventBus::new(16)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let outcome = exec
            .schedule_transition(&plan(5_000, 12_000), &deck, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Cancelled);
        assert!(deck.plays().is_empty());
        assert!(deck.volumes().is_empty());
        assert_eq!(deck.volume(), Some(0.8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_fade_snaps_to_full_gain() {
        let deck = FakeDeck::new(StartBehavior::Ok);
        let exec = executor(0.0, Arc::new(EventBus::new(16)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(6_000)).await;
            trigger.cancel();
        });

        let outcome = exec
            .schedule_transition(&plan(0, 12_000), &deck, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Interrupted);
        let volumes = deck.volumes();
        assert!(volumes.len() < 31);
        assert_eq!(volumes.last().unwrap().1, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_keeps_outgoing_audible() {
        let events = Arc::new(EventBus::new(16));
        let mut rx = events.subscribe_topic(EventTopic::Transition);
        let deck = FakeDeck::new(StartBehavior::Fail);
        let exec = executor(0.0, events.clone());

        let err = exec
            .schedule_transition(&plan(0, 12_000), &deck, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeckNotReady(_)));
        assert_eq!(deck.volume(), Some(0.8));
        assert!(matches!(rx.try_recv().unwrap(), DjEvent::TransitionFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_start_times_out() {
        let deck = FakeDeck::new(StartBehavior::Hang);
        let exec = executor(0.0, Arc::new(EventBus::new(16)));
        let began = Instant::now();

        let err = exec
            .schedule_transition(&plan(1_000, 12_000), &deck, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeckNotReady(_)));
        assert_eq!((Instant::now() - began).as_millis(), 9_000);
        assert_eq!(deck.volume(), Some(0.8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_sweep_cues() {
        let events = Arc::new(EventBus::new(64));
        let mut rx = events.subscribe_topic(EventTopic::Effects);
        let deck = FakeDeck::new(StartBehavior::Ok);
        let exec = executor(1.0, events.clone());

        exec.schedule_transition(&plan(0, 2_000), &deck, &CancellationToken::new())
            .await
            .unwrap();

        let mut durations = Vec::new();
        while let Ok(DjEvent::FilterSweep { duration_secs, .. }) = rx.try_recv() {
            durations.push(duration_secs);
        }
        // min(1.5, 2000/2000) then the mid-fade cue
        assert_eq!(durations, vec![1.0, 0.9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sweep_when_probability_zero() {
        let events = Arc::new(EventBus::new(64));
        let mut rx = events.subscribe_topic(EventTopic::Effects);
        let deck = FakeDeck::new(StartBehavior::Ok);
        let exec = executor(0.0, events.clone());

        exec.schedule_transition(&plan(0, 2_000), &deck, &CancellationToken::new())
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
