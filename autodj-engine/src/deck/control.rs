//! [`DeckControl`] over a [`DeckGraph`]
//!
//! `play_track` loads a fresh source on the quieter deck and starts it;
//! that deck becomes the incoming one. `set_volume(v)` moves the crossfader
//! so the incoming deck sits at gain `v` and the outgoing deck at its
//! equal-power complement, which keeps the executor's single-gain ramp and
//! the graph's two-deck law consistent.

use super::{DeckGraph, DeckSource};
use crate::error::Result;
use crate::executor::DeckControl;
use crate::types::EnrichedTrack;
use async_trait::async_trait;
use autodj_common::events::DeckId;
use autodj_common::fade_curves::crossfade_position_for_gain;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Graph shared between the control surface, renderers and probes
pub type SharedDeckGraph = Arc<Mutex<DeckGraph>>;

/// Lock the graph, recovering from a poisoned lock
///
/// Graph state is plain gains and handles; a panic elsewhere cannot leave
/// it half-updated in a way later calls would trip over.
pub fn lock(graph: &SharedDeckGraph) -> MutexGuard<'_, DeckGraph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates the source a URI plays through
pub trait SourceFactory: Send + Sync {
    fn create(&self, uri: &str) -> Result<DeckSource>;
}

pub struct GraphDeckControl {
    graph: SharedDeckGraph,
    factory: Arc<dyn SourceFactory>,
    incoming: Mutex<Option<DeckId>>,
    pending: Mutex<Option<EnrichedTrack>>,
}

impl GraphDeckControl {
    pub fn new(graph: SharedDeckGraph, factory: Arc<dyn SourceFactory>) -> Self {
        Self {
            graph,
            factory,
            incoming: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    pub fn graph(&self) -> &SharedDeckGraph {
        &self.graph
    }

    fn incoming_deck(&self, graph: &DeckGraph) -> DeckId {
        self.incoming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| graph.quieter_deck())
    }
}

/// Crossfader position at which `deck` plays at `gain`
fn position_for(deck: DeckId, gain: f32) -> f32 {
    let x = crossfade_position_for_gain(gain);
    match deck {
        DeckId::B => x,
        DeckId::A => 1.0 - x,
    }
}

#[async_trait]
impl DeckControl for GraphDeckControl {
    fn prepare(&self, next: &EnrichedTrack) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(next.clone());
    }

    async fn play_track(&self, uri: &str, cue_ms: u64) -> Result<()> {
        let source = self.factory.create(uri)?;
        let track = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .filter(|t| t.track.uri == uri);

        let mut graph = lock(&self.graph);
        let target = graph.quieter_deck();
        graph.load(target, source, track);
        graph.play(target, uri, cue_ms)?;

        *self.incoming.lock().unwrap_or_else(PoisonError::into_inner) = Some(target);
        debug!(deck = %target, uri = %uri, cue_ms, "Incoming deck started");
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        let mut graph = lock(&self.graph);
        let deck = self.incoming_deck(&graph);
        graph.set_crossfade(position_for(deck, volume));
        Ok(())
    }

    async fn silence(&self) -> Result<()> {
        lock(&self.graph).stop_all();
        *self.incoming.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn volume(&self) -> Option<f32> {
        let graph = lock(&self.graph);
        let deck = self.incoming_deck(&graph);
        Some(graph.deck(deck).gain())
    }

    fn position_ms(&self) -> Option<u64> {
        let graph = lock(&self.graph);
        graph.deck(graph.dominant_deck()).position_ms()
    }
}
