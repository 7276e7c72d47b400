//! Dual-deck audio graph
//!
//! Two decks, each holding either a stream source (audio routed through the
//! deck's software gain stage and into the shared mix) or an embedded
//! third-party player (which renders its own audio and only accepts an
//! integer volume percentage). A master gain scales both.
//!
//! `set_crossfade(x)` puts deck A at `cos(πx/2)` and deck B at
//! `cos(π(1-x)/2)`, so the summed power stays constant.
//!
//! Sources are owned by their deck. Replacing a source or dropping the graph
//! stops it, and embedded players are destroyed.

pub mod control;
pub mod probe;
pub mod simulated;

pub use control::{GraphDeckControl, SharedDeckGraph, SourceFactory};
pub use probe::{AmplitudeProbe, ProbeTap};

use crate::error::Result;
use crate::types::EnrichedTrack;
use autodj_common::config::DeckConfig;
use autodj_common::events::{DeckId, DjEvent, EventBus};
use autodj_common::fade_curves::equal_power_gains;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info, warn};

/// Stream-backed source whose audio passes through the graph
pub trait StreamSource: Send {
    /// Start `uri` at `cue_ms`
    fn play(&mut self, uri: &str, cue_ms: u64) -> Result<()>;

    fn stop(&mut self);

    fn is_ready(&self) -> bool;

    fn position_ms(&self) -> Option<u64>;

    /// Fill `out` with the next mono samples at unity gain; returns samples written
    fn render(&mut self, out: &mut [f32]) -> usize;
}

/// Third-party player that renders its own audio
pub trait EmbeddedPlayer: Send {
    fn play(&mut self, uri: &str, cue_ms: u64) -> Result<()>;

    /// Volume as an integer percentage (0-100)
    fn set_volume_percent(&mut self, percent: u8) -> Result<()>;

    fn is_ready(&self) -> bool;

    fn position_ms(&self) -> Option<u64>;

    /// Tear down the player; it is not used afterwards
    fn destroy(&mut self);
}

/// What a deck plays through
pub enum DeckSource {
    Stream(Box<dyn StreamSource>),
    Embedded(Box<dyn EmbeddedPlayer>),
}

impl DeckSource {
    fn play(&mut self, uri: &str, cue_ms: u64) -> Result<()> {
        match self {
            DeckSource::Stream(s) => s.play(uri, cue_ms),
            DeckSource::Embedded(p) => p.play(uri, cue_ms),
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            DeckSource::Stream(s) => s.is_ready(),
            DeckSource::Embedded(p) => p.is_ready(),
        }
    }

    fn position_ms(&self) -> Option<u64> {
        match self {
            DeckSource::Stream(s) => s.position_ms(),
            DeckSource::Embedded(p) => p.position_ms(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DeckSource::Stream(_) => "stream",
            DeckSource::Embedded(_) => "embedded",
        }
    }
}

impl Drop for DeckSource {
    fn drop(&mut self) {
        match self {
            DeckSource::Stream(s) => s.stop(),
            DeckSource::Embedded(p) => p.destroy(),
        }
    }
}

/// One playback deck
pub struct Deck {
    id: DeckId,
    source: Option<DeckSource>,
    /// Crossfader gain, before master
    gain: f32,
    ready: bool,
    current: Option<EnrichedTrack>,
    tap: Option<ProbeTap>,
    probe: Option<AmplitudeProbe>,
    probe_window: usize,
    scratch: Vec<f32>,
}

impl Deck {
    fn new(id: DeckId, gain: f32, probe_window: usize) -> Self {
        Self {
            id,
            source: None,
            gain,
            ready: false,
            current: None,
            tap: None,
            probe: None,
            probe_window,
            scratch: Vec::new(),
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_ready(&self) -> bool {
        self.ready && self.source.as_ref().map_or(false, DeckSource::is_ready)
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    /// Track currently loaded, when known
    pub fn current(&self) -> Option<&EnrichedTrack> {
        self.current.as_ref()
    }

    pub fn position_ms(&self) -> Option<u64> {
        self.source.as_ref().and_then(DeckSource::position_ms)
    }

    fn load(&mut self, source: DeckSource, track: Option<EnrichedTrack>) {
        if let Some(old) = self.source.take() {
            debug!(deck = %self.id, kind = old.kind(), "Replacing deck source");
        }

        match source {
            DeckSource::Stream(_) => {
                let (tap, probe) = AmplitudeProbe::new(self.probe_window);
                self.tap = Some(tap);
                self.probe = Some(probe);
            }
            DeckSource::Embedded(_) => {
                self.tap = None;
                self.probe = None;
            }
        }

        self.source = Some(source);
        self.current = track;
        self.ready = false;
    }

    /// Drop the source (stopping or destroying it) and forget the track
    fn unload(&mut self) {
        if let Some(old) = self.source.take() {
            debug!(deck = %self.id, kind = old.kind(), "Deck source unloaded");
        }
        self.tap = None;
        self.probe = None;
        self.current = None;
        self.ready = false;
    }

    fn play(&mut self, uri: &str, cue_ms: u64) -> Result<()> {
        let source = self.source.as_mut().ok_or_else(|| {
            crate::Error::DeckNotReady(format!("deck {} has no source", self.id))
        })?;
        source.play(uri, cue_ms)?;
        self.ready = true;
        Ok(())
    }

    /// Apply crossfader gain scaled by `master`
    fn apply_gain(&mut self, gain: f32, master: f32) {
        self.gain = gain;
        if let Some(DeckSource::Embedded(player)) = self.source.as_mut() {
            let percent = (gain * master * 100.0).round().clamp(0.0, 100.0) as u8;
            if let Err(e) = player.set_volume_percent(percent) {
                warn!(deck = %self.id, error = %e, "Embedded player rejected volume");
            }
        }
    }

    /// Render this deck's contribution into `mix`, feeding the probe
    fn render_into(&mut self, mix: &mut [f32], master: f32) {
        let Some(DeckSource::Stream(source)) = self.source.as_mut() else {
            return;
        };

        self.scratch.resize(mix.len(), 0.0);
        let written = source.render(&mut self.scratch);
        let scale = self.gain * master;

        for (out, s) in mix.iter_mut().zip(self.scratch[..written].iter_mut()) {
            *s *= scale;
            *out += *s;
        }

        if let Some(tap) = self.tap.as_mut() {
            tap.write(&self.scratch[..written]);
        }
    }

    /// Current beat-amplitude level (0 for embedded players)
    fn level(&mut self) -> f32 {
        self.probe.as_mut().map_or(0.0, AmplitudeProbe::level)
    }
}

pub struct DeckGraph {
    deck_a: Deck,
    deck_b: Deck,
    master_gain: f32,
    crossfade: f32,
    config: DeckConfig,
    events: Arc<EventBus>,
}

impl DeckGraph {
    /// New graph with deck A on air
    pub fn new(config: DeckConfig, events: Arc<EventBus>) -> Self {
        let (a, b) = equal_power_gains(0.0);
        Self {
            deck_a: Deck::new(DeckId::A, a, config.probe_window),
            deck_b: Deck::new(DeckId::B, b, config.probe_window),
            master_gain: 1.0,
            crossfade: 0.0,
            config,
            events,
        }
    }

    pub fn deck(&self, id: DeckId) -> &Deck {
        match id {
            DeckId::A => &self.deck_a,
            DeckId::B => &self.deck_b,
        }
    }

    fn deck_mut(&mut self, id: DeckId) -> &mut Deck {
        match id {
            DeckId::A => &mut self.deck_a,
            DeckId::B => &mut self.deck_b,
        }
    }

    pub fn crossfade(&self) -> f32 {
        self.crossfade
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 1.0);
        self.set_crossfade(self.crossfade);
    }

    /// Equal-power crossfade; 0 = deck A, 1 = deck B
    pub fn set_crossfade(&mut self, x: f32) {
        let x = x.clamp(0.0, 1.0);
        let (a, b) = equal_power_gains(x);
        let master = self.master_gain;

        self.crossfade = x;
        self.deck_a.apply_gain(a, master);
        self.deck_b.apply_gain(b, master);
    }

    /// Deck with the higher gain (A on ties)
    pub fn dominant_deck(&self) -> DeckId {
        if self.deck_a.gain >= self.deck_b.gain {
            DeckId::A
        } else {
            DeckId::B
        }
    }

    /// Deck with the lower gain (B on ties)
    pub fn quieter_deck(&self) -> DeckId {
        self.dominant_deck().other()
    }

    /// Load a source onto a deck, replacing (and disposing) any previous one
    pub fn load(&mut self, id: DeckId, source: DeckSource, track: Option<EnrichedTrack>) {
        let master = self.master_gain;
        let deck = self.deck_mut(id);
        deck.load(source, track);
        let gain = deck.gain;
        deck.apply_gain(gain, master);
        info!(deck = %id, "Deck source loaded");
    }

    pub fn play(&mut self, id: DeckId, uri: &str, cue_ms: u64) -> Result<()> {
        self.deck_mut(id).play(uri, cue_ms)
    }

    /// Unload both decks; nothing renders until the next `load`
    pub fn stop_all(&mut self) {
        self.deck_a.unload();
        self.deck_b.unload();
        info!("Both decks stopped");
    }

    /// Mix both stream decks into `out` (overwritten)
    pub fn render(&mut self, out: &mut [f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let master = self.master_gain;
        self.deck_a.render_into(out, master);
        self.deck_b.render_into(out, master);
    }

    /// Sample both probes and publish a `Beat` event per loaded deck
    pub fn sample_beats(&mut self) -> [(DeckId, f32); 2] {
        let levels = [
            (DeckId::A, self.deck_a.level()),
            (DeckId::B, self.deck_b.level()),
        ];
        for (deck, level) in levels {
            if self.deck(deck).is_loaded() {
                self.events.emit_lossy(DjEvent::Beat { deck, level });
            }
        }
        levels
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }
}

/// Load `source` on the quieter deck and crossfade onto it
///
/// Steps the crossfader across `crossfade_steps` over `crossfade_ms`, toward
/// whichever side the target deck is on. Returns the deck now on air.
pub async fn crossfade_to(
    graph: &SharedDeckGraph,
    source: DeckSource,
    track: EnrichedTrack,
    cue_ms: u64,
) -> Result<DeckId> {
    let uri = track.track.uri.clone();

    let (target, steps, step) = {
        let mut g = control::lock(graph);
        let target = g.quieter_deck();
        g.load(target, source, Some(track));
        g.play(target, &uri, cue_ms)?;

        let steps = g.config.crossfade_steps.max(1);
        let step = (Duration::from_millis(g.config.crossfade_ms) / steps).max(Duration::from_millis(1));
        (target, steps, step)
    };

    info!(deck = %target, uri = %uri, "Crossfading to deck");

    let position = |i: u32| {
        let t = i as f32 / steps as f32;
        match target {
            DeckId::B => t,
            DeckId::A => 1.0 - t,
        }
    };

    control::lock(graph).set_crossfade(position(0));

    let mut ticker = interval_at(Instant::now() + step, step);
    for i in 1..=steps {
        ticker.tick().await;
        control::lock(graph).set_crossfade(position(i));
    }

    Ok(target)
}
