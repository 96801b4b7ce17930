//! # Event Bus System
//!
//! Typed, decoupled notifications from the playback core to whoever is
//! listening (UI, now-playing integrations, diagnostics), built on
//! `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   emit    ┌───────────┐
//! │ PlaybackEngine ├──────────>│           │    subscribe    ┌────────────┐
//! └────────────────┘           │ EventBus  ├────────────────>│ Subscriber │
//! ┌────────────────┐   emit    │ (broadcast│                 └────────────┘
//! │ StreamingTrack ├──────────>│  channel) │    subscribe    ┌────────────┐
//! └────────────────┘           │           ├────────────────>│ Subscriber │
//!                              └───────────┘                 └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::playback::PlaybackState;
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::StateChanged {
//!     state: PlaybackState::Buffering,
//! }))
//! .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback state changed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal; `Progress` events are the usual culprit.
//! - **`RecvError::Closed`**: every sender is gone, the player shut down.
//!
//! Emitting with no subscribers returns an error; publishers ignore it.

use bridge_traits::playback::PlaybackState;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Transport, queue and state events from the playback engine
    Playback(PlaybackEvent),
    /// Download/decrypt pipeline events from streaming tracks
    Streaming(StreamingEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Streaming(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::TrackFailed { .. }) => EventSeverity::Error,
            CoreEvent::Streaming(StreamingEvent::LoadFailed { will_retry: false, .. }) => {
                EventSeverity::Error
            }
            CoreEvent::Streaming(StreamingEvent::LoadFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::StateChanged { .. })
            | CoreEvent::Playback(PlaybackEvent::TrackChanged { .. })
            | CoreEvent::Streaming(StreamingEvent::FileFinalized { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events published by the playback engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// The engine entered a new state.
    StateChanged { state: PlaybackState },
    /// The current track changed; `None` once the queue is exhausted.
    TrackChanged {
        track_id: Option<String>,
        queue_index: Option<usize>,
    },
    /// A buffer of the current track finished rendering.
    Progress { track_id: String, elapsed_ms: u64 },
    /// A track could not be played and was skipped.
    TrackFailed { track_id: String, message: String },
    /// The queue was replaced or modified.
    QueueChanged { length: usize },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::StateChanged { .. } => "Playback state changed",
            PlaybackEvent::TrackChanged { .. } => "Current track changed",
            PlaybackEvent::Progress { .. } => "Playback progress",
            PlaybackEvent::TrackFailed { .. } => "Track skipped after failure",
            PlaybackEvent::QueueChanged { .. } => "Queue changed",
        }
    }
}

// ============================================================================
// Streaming Events
// ============================================================================

/// Events published while a track's encrypted file is being fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StreamingEvent {
    /// A network load started at `offset` bytes.
    LoadStarted { track_id: String, offset: u64 },
    /// The network load delivered every byte.
    LoadFinished { track_id: String, bytes: u64 },
    /// The network load failed.
    LoadFailed {
        track_id: String,
        message: String,
        /// Whether the track still has a retry left.
        will_retry: bool,
    },
    /// The partial file was promoted to its final name.
    FileFinalized {
        track_id: String,
        file_id: String,
        length: u64,
    },
}

impl StreamingEvent {
    fn description(&self) -> &str {
        match self {
            StreamingEvent::LoadStarted { .. } => "Track download started",
            StreamingEvent::LoadFinished { .. } => "Track download finished",
            StreamingEvent::LoadFailed { .. } => "Track download failed",
            StreamingEvent::FileFinalized { .. } => "Track file finalized",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cloning the bus yields another handle on the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let streaming_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Streaming(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed(state: PlaybackState) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::StateChanged { state })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(state_changed(PlaybackState::Stopped)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Playback(PlaybackEvent::TrackChanged {
            track_id: Some("track-1".to_string()),
            queue_index: Some(0),
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_cloned_bus_shares_channel() {
        let bus = EventBus::new(10);
        let clone = bus.clone();
        let mut sub = bus.subscribe();

        clone.emit(state_changed(PlaybackState::Playing)).unwrap();
        assert_eq!(sub.recv().await.unwrap(), state_changed(PlaybackState::Playing));
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Streaming(_)));

        bus.emit(state_changed(PlaybackState::Buffering)).ok();

        let finalized = CoreEvent::Streaming(StreamingEvent::FileFinalized {
            track_id: "track-1".to_string(),
            file_id: "a1b2".to_string(),
            length: 20_000,
        });
        bus.emit(finalized.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), finalized);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(CoreEvent::Playback(PlaybackEvent::Progress {
                track_id: "track-1".to_string(),
                elapsed_ms: i * 700,
            }))
            .ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Playback(PlaybackEvent::TrackFailed {
            track_id: "t".to_string(),
            message: "boom".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let retrying = CoreEvent::Streaming(StreamingEvent::LoadFailed {
            track_id: "t".to_string(),
            message: "reset".to_string(),
            will_retry: true,
        });
        assert_eq!(retrying.severity(), EventSeverity::Warning);

        let final_failure = CoreEvent::Streaming(StreamingEvent::LoadFailed {
            track_id: "t".to_string(),
            message: "reset".to_string(),
            will_retry: false,
        });
        assert_eq!(final_failure.severity(), EventSeverity::Error);

        let progress = CoreEvent::Playback(PlaybackEvent::Progress {
            track_id: "t".to_string(),
            elapsed_ms: 10,
        });
        assert_eq!(progress.severity(), EventSeverity::Debug);
        assert!(EventSeverity::Error > EventSeverity::Info);
    }

    #[test]
    fn test_event_serialization() {
        let event = state_changed(PlaybackState::Interrupted);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Playback\""));
        assert!(json.contains("\"event\":\"StateChanged\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        bus.emit(state_changed(PlaybackState::Paused)).unwrap();
        assert_eq!(
            stream.try_recv().unwrap().unwrap(),
            state_changed(PlaybackState::Paused)
        );
    }
}
