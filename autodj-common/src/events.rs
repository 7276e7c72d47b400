//! Event types for the autodj event system
//!
//! Replaces ambient "window event" fan-out with a typed in-process bus:
//! every producer publishes a [`DjEvent`], every consumer subscribes either to
//! the full stream or to a single [`EventTopic`]. Dropping a receiver is the
//! unsubscribe.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One of the two decks in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    /// The other deck
    pub fn other(&self) -> DeckId {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckId::A => write!(f, "A"),
            DeckId::B => write!(f, "B"),
        }
    }
}

/// Snapshot of the track currently on air
///
/// `bpm` and `energy` are always populated (defaults 120 / 0.5) so visual
/// consumers never have to special-case missing analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub track_id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub bpm: f64,
    pub energy: f64,
    pub camelot: Option<String>,
}

/// autodj event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag so they
/// can be forwarded verbatim to UI or logging sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DjEvent {
    /// The on-air track changed
    ///
    /// Triggers:
    /// - Visuals: retarget tempo/energy-driven animation
    /// - Now-playing displays
    NowPlaying {
        now_playing: NowPlaying,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback started or stopped
    TransportChanged {
        playing: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A transition plan was handed to the executor
    TransitionScheduled {
        transition_id: Uuid,
        from_track_id: String,
        to_track_id: String,
        /// Milliseconds until the fade begins
        delay_ms: u64,
        fade_ms: u64,
        start_cue_ms: u64,
        /// Transition style picked by the adaptive selector
        style: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Auxiliary filter-sweep cue (visual/FX only)
    FilterSweep {
        transition_id: Uuid,
        duration_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Incoming deck reached full gain
    CrossfadeComplete {
        transition_id: Uuid,
        track_id: String,
        duration_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Transition could not proceed; outgoing deck left on air
    TransitionFailed {
        transition_id: Uuid,
        track_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// No candidate is left to follow the track on air
    ///
    /// Published once per exhaustion; the session stops the transport when
    /// the track ends unless `set_pool` supplies more tracks first.
    PoolExhausted {
        current_track_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Beat-amplitude sample from a deck probe (0.0-1.0)
    Beat {
        deck: DeckId,
        level: f32,
    },
}

/// Coarse event categories for topic subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    NowPlaying,
    Transport,
    Transition,
    Effects,
    Beat,
}

impl DjEvent {
    /// Topic this event is published under
    pub fn topic(&self) -> EventTopic {
        match self {
            DjEvent::NowPlaying { .. } => EventTopic::NowPlaying,
            DjEvent::TransportChanged { .. } => EventTopic::Transport,
            DjEvent::TransitionScheduled { .. }
            | DjEvent::CrossfadeComplete { .. }
            | DjEvent::TransitionFailed { .. }
            | DjEvent::PoolExhausted { .. } => EventTopic::Transition,
            DjEvent::FilterSweep { .. } => EventTopic::Effects,
            DjEvent::Beat { .. } => EventTopic::Beat,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for session-wide events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
pub struct EventBus {
    tx: broadcast::Sender<DjEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Events beyond `capacity` that a slow subscriber has not read are
    /// dropped for that subscriber (it observes `Lagged`).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DjEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to a single topic
    pub fn subscribe_topic(&self, topic: EventTopic) -> TopicReceiver {
        TopicReceiver {
            topic,
            rx: self.tx.subscribe(),
        }
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DjEvent) -> Result<usize, broadcast::error::SendError<DjEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DjEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped: no subscribers");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver that only yields events of one topic
pub struct TopicReceiver {
    topic: EventTopic,
    rx: broadcast::Receiver<DjEvent>,
}

impl TopicReceiver {
    /// Topic this receiver filters on
    pub fn topic(&self) -> EventTopic {
        self.topic
    }

    /// Wait for the next event on this topic
    pub async fn recv(&mut self) -> Result<DjEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.topic() == self.topic {
                return Ok(event);
            }
        }
    }

    /// Next already-queued event on this topic, if any
    pub fn try_recv(&mut self) -> Result<DjEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if event.topic() == self.topic {
                return Ok(event);
            }
        }
    }
}
