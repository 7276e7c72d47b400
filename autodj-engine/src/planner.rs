//! Transition planning
//!
//! Two steps per transition:
//! 1. [`TransitionPlanner::pick_next_track`] scores every featured candidate
//!    against the current track (key, tempo, energy, danceability).
//! 2. [`TransitionPlanner::compute_transition`] derives the cue into the next
//!    track, the outro window of the current one, the fade length, and a
//!    start instant quantized up to the next bar of the current track.
//!
//! Planning never fails: missing features and analysis fall back to
//! defaults (120 BPM, synthetic bar grid, tempo-derived cue).

use crate::types::{EnrichedTrack, TransitionPlan, BEATS_PER_BAR};
use autodj_common::config::PlannerConfig;
use autodj_common::music_theory::{clamp01, is_harmonic, lerp};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Live playback position of the outgoing deck
///
/// Read at quantization time, never cached by the planner.
pub trait PositionSource {
    fn position_ms(&self) -> Option<u64>;
}

impl<F> PositionSource for F
where
    F: Fn() -> Option<u64>,
{
    fn position_ms(&self) -> Option<u64> {
        self()
    }
}

/// Outro window of the outgoing track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutroWindow {
    pub start_ms: u64,
    /// Track time remaining after the window start
    pub headroom_ms: u64,
    pub min_fade_ms: u64,
}

pub struct TransitionPlanner {
    config: PlannerConfig,
}

impl TransitionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Compatibility score of `candidate` following `current` (higher is better)
    pub fn score(&self, current: &EnrichedTrack, candidate: &EnrichedTrack) -> f64 {
        let c = &self.config;

        let key_term = if is_harmonic(current.camelot, candidate.camelot) {
            c.harmonic_bonus
        } else {
            c.clash_penalty
        };

        let bpm_delta = (candidate.tempo() - current.tempo()).abs();
        let bpm_term = -(bpm_delta / c.bpm_delta_divisor).min(c.bpm_penalty_cap);

        let energy_term =
            -(candidate.energy_or_default() - current.energy_or_default()).abs() * c.energy_delta_scale;

        let danceability = candidate
            .features
            .as_ref()
            .map(|f| f.danceability_or_default())
            .unwrap_or(0.0);

        c.key_weight * key_term
            + c.bpm_weight * bpm_term
            + c.energy_weight * energy_term
            + c.danceability_weight * danceability
    }

    /// Best-scoring next track
    ///
    /// The current track and featureless candidates are excluded from
    /// scoring; ties go to the candidate seen first. With no featured
    /// candidate left the pick is uniform over the remaining pool. `None`
    /// only when nothing but the current track is available.
    pub fn pick_next_track<R: Rng + ?Sized>(
        &self,
        current: &EnrichedTrack,
        pool: &[EnrichedTrack],
        rng: &mut R,
    ) -> Option<EnrichedTrack> {
        let candidates: Vec<&EnrichedTrack> =
            pool.iter().filter(|t| t.id() != current.id()).collect();

        let mut best: Option<(&EnrichedTrack, f64)> = None;
        for candidate in candidates.iter().filter(|t| t.features.is_some()) {
            let score = self.score(current, candidate);
            // strict: first encountered wins ties
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }

        if let Some((track, score)) = best {
            debug!(current = %current.id(), next = %track.id(), score, "Next track scored");
            return Some(track.clone());
        }

        let pick = candidates.choose(rng).map(|t| (*t).clone());
        if let Some(track) = &pick {
            debug!(current = %current.id(), next = %track.id(), "No featured candidates; random pick");
        }
        pick
    }

    /// Where playback of `next` should start, skipping its intro
    pub fn start_cue_ms(&self, next: &EnrichedTrack) -> u64 {
        let c = &self.config;

        let intro = next
            .sections()
            .iter()
            .find(|s| s.start > c.intro_window_start_secs && s.start < c.intro_window_end_secs);
        if let Some(section) = intro {
            return secs_to_ms_floor(section.start);
        }

        let first_bar = next.analysis.as_ref().and_then(|a| a.bars.first());
        if let Some(start) = first_bar {
            return secs_to_ms_floor(*start);
        }

        // one tempo-derived bar, capped
        let bar_ms = ((60.0 / next.tempo()) * BEATS_PER_BAR * 1000.0).round() as u64;
        bar_ms.min(c.cue_fallback_cap_ms)
    }

    /// Outro window of `current` and the minimum fade its headroom allows
    pub fn outro_window(&self, current: &EnrichedTrack) -> OutroWindow {
        let c = &self.config;
        let duration = current.duration_ms();

        let preferred = match current.sections().last() {
            Some(section) => secs_to_ms_floor(section.start),
            None => duration.saturating_sub(c.outro_lead_ms),
        };
        let start_ms = preferred.min(duration.saturating_sub(c.outro_min_tail_ms));
        let headroom_ms = duration.saturating_sub(start_ms);

        let min_fade_ms = if headroom_ms > c.headroom_threshold_ms {
            c.long_min_fade_ms
        } else {
            c.short_min_fade_ms
        };

        OutroWindow {
            start_ms,
            headroom_ms,
            min_fade_ms,
        }
    }

    /// Fade length: 80%..120% of the target by energy, never below the minimum
    pub fn fade_ms(&self, current: &EnrichedTrack, min_fade_ms: u64) -> u64 {
        let c = &self.config;
        let desired = match current.energy() {
            Some(energy) => {
                let target = c.target_fade_ms as f64;
                lerp(target * 0.8, target * 1.2, clamp01(energy)).round() as u64
            }
            None => c.fallback_fade_ms,
        };
        desired.max(min_fade_ms)
    }

    /// Concrete plan for moving from `current` to `next`
    pub fn compute_transition(
        &self,
        current: &EnrichedTrack,
        next: &EnrichedTrack,
        position: &dyn PositionSource,
    ) -> TransitionPlan {
        let start_cue_ms = self.start_cue_ms(next);
        let outro = self.outro_window(current);
        let fade_ms = self.fade_ms(current, outro.min_fade_ms);
        let bars = current.bar_grid();

        // latest read, taken together with `now`
        let now = Instant::now();
        let pos_ms = position.position_ms().unwrap_or(0);

        let lead_ms = outro
            .start_ms
            .saturating_sub(pos_ms)
            .max(self.config.min_lead_ms);
        let at = quantize_to_next_bar(now, pos_ms, lead_ms, &bars);

        let reason = format!(
            "harmonic={} bpm≈{}",
            is_harmonic(current.camelot, next.camelot),
            next.features.as_ref().map(|f| f.tempo.round()).unwrap_or(0.0)
        );

        debug!(
            current = %current.id(),
            next = %next.id(),
            pos_ms,
            outro_start_ms = outro.start_ms,
            delay_ms = (at - now).as_millis() as u64,
            fade_ms,
            start_cue_ms,
            "Transition computed"
        );

        TransitionPlan {
            id: Uuid::new_v4(),
            at,
            fade_ms,
            start_cue_ms,
            gain_from: 0.0,
            gain_to: 1.0,
            reason,
            next: next.clone(),
            outro_start_ms: outro.start_ms,
            min_fade_ms: outro.min_fade_ms,
        }
    }
}

/// First bar boundary at or after `now + lead_ms`
///
/// `pos_ms` is the track position at `now`; `bars` are bar starts in seconds.
/// Falls back to the unquantized earliest instant when the grid ends first.
pub fn quantize_to_next_bar(now: Instant, pos_ms: u64, lead_ms: u64, bars: &[f64]) -> Instant {
    let earliest_pos_ms = pos_ms + lead_ms;

    let bar_ms = bars
        .iter()
        .map(|s| (s.max(0.0) * 1000.0).ceil() as u64)
        .find(|ms| *ms >= earliest_pos_ms);

    match bar_ms {
        Some(ms) => now + Duration::from_millis(ms - pos_ms),
        None => now + Duration::from_millis(lead_ms),
    }
}

fn secs_to_ms_floor(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).floor() as u64
}
