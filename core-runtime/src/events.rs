//! # Event Bus System
//!
//! Typed events for the verse audio core, delivered over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enums for playback, generation, cache and sleep-timer domains
//! - **EventBus**: Broadcast channel owned by whoever constructs it (typically the orchestrator)
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! There is no process-wide bus. Each `PlaybackOrchestrator` owns (or is
//! handed) an `EventBus`, and tests subscribe to that instance directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Orchestrator ├────────────>│           │
//! └──────────────┘             │           │    subscribe    ┌────────────┐
//! ┌──────────────┐    emit     │ EventBus  ├────────────────>│ UI shell   │
//! │ Generation   ├────────────>│ (broadcast│                 └────────────┘
//! └──────────────┘             │  channel) │    subscribe    ┌────────────┐
//! ┌──────────────┐    emit     │           ├────────────────>│ Tests      │
//! │ SegmentCache ├────────────>│           │                 └────────────┘
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::VerseChanged {
//!     chapter_id: "john-3".to_string(),
//!     verse_number: 16,
//! }))
//! .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Current verse changed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.
//!
//! `emit` returns an error when nobody is subscribed. Producers in this
//! workspace ignore that case with `.ok()`.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used types
pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Position updates arrive several times per second, so the buffer is sized
/// for a few seconds of backlog.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Playback state machine events
    Playback(PlaybackEvent),
    /// Speech generation lifecycle events
    Generation(GenerationEvent),
    /// Segment cache events
    Cache(CacheEvent),
    /// Sleep timer events
    SleepTimer(SleepTimerEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Generation(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::SleepTimer(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Generation(GenerationEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::WriteFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Generation(GenerationEvent::FellBack { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::ChapterFinished { .. }) => EventSeverity::Info,
            CoreEvent::Generation(GenerationEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::SleepTimer(SleepTimerEvent::Fired { .. }) => EventSeverity::Info,
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

/// Observable playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    Ready,
    Playing,
    Paused,
    Finished,
    Error,
}

impl PlaybackPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackPhase::Idle => "idle",
            PlaybackPhase::Ready => "ready",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::Finished => "finished",
            PlaybackPhase::Error => "error",
        }
    }
}

impl fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the playback orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// Observable state changed.
    StateChanged {
        /// Chapter the session belongs to, if any.
        chapter_id: Option<String>,
        /// New state.
        state: PlaybackPhase,
        /// Whether audio is still being prepared.
        is_loading: bool,
    },
    /// A composition was attached to the transport.
    CompositionAttached {
        chapter_id: String,
        /// Attached duration (milliseconds).
        duration_ms: u64,
        /// Whether this composition covers the whole chapter.
        complete: bool,
    },
    /// The verse under the playhead changed.
    VerseChanged {
        chapter_id: String,
        verse_number: u32,
    },
    /// Playback position updated.
    PositionChanged {
        chapter_id: String,
        /// New position (milliseconds).
        position_ms: u64,
        /// Attached duration (milliseconds).
        duration_ms: u64,
    },
    /// A fuller composition is ready but swapping it in now would be audible.
    ReloadDeferred {
        chapter_id: String,
        /// Buffered audio left ahead of the playhead (milliseconds).
        remaining_ms: u64,
    },
    /// A fuller composition was swapped in.
    ReloadApplied {
        chapter_id: String,
        /// What triggered the swap (e.g. "generation", "pause", "near_end", "reached_end").
        trigger: String,
        /// New attached duration (milliseconds).
        duration_ms: u64,
    },
    /// The chapter truly ended: generation is complete and nothing is pending.
    ChapterFinished { chapter_id: String },
    /// Playback error occurred.
    Error {
        /// The chapter ID if available.
        chapter_id: Option<String>,
        /// Human-readable error message.
        message: String,
        /// Whether playback can continue or be retried.
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::StateChanged { .. } => "Playback state changed",
            PlaybackEvent::CompositionAttached { .. } => "Audio composition attached",
            PlaybackEvent::VerseChanged { .. } => "Current verse changed",
            PlaybackEvent::PositionChanged { .. } => "Playback position changed",
            PlaybackEvent::ReloadDeferred { .. } => "Composition reload deferred",
            PlaybackEvent::ReloadApplied { .. } => "Composition reload applied",
            PlaybackEvent::ChapterFinished { .. } => "Chapter finished",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Generation Events
// ============================================================================

/// Events describing a speech generation task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum GenerationEvent {
    /// Generation task started.
    Started {
        /// Generation task identifier.
        generation_id: String,
        chapter_id: String,
        /// Preferred cache key.
        cache_key: String,
        /// "interactive" or "background".
        priority: String,
    },
    /// Incremental progress update.
    Progress {
        generation_id: String,
        /// Estimated completion (0-100).
        percent: u8,
    },
    /// A minimal playable prefix is available.
    QuickStartReady {
        generation_id: String,
        cache_key: String,
        /// Playable prefix duration (milliseconds).
        duration_ms: u64,
    },
    /// The preferred voice source failed and generation switched sources.
    FellBack {
        generation_id: String,
        from: String,
        to: String,
        reason: String,
    },
    /// Generation finished with a complete result.
    Completed {
        generation_id: String,
        cache_key: String,
        /// Full audio duration (milliseconds).
        duration_ms: u64,
    },
    /// Generation failed on every source.
    Failed {
        generation_id: String,
        message: String,
    },
    /// Generation was cancelled (superseded or stopped).
    Cancelled { generation_id: String },
}

impl GenerationEvent {
    fn description(&self) -> &str {
        match self {
            GenerationEvent::Started { .. } => "Speech generation started",
            GenerationEvent::Progress { .. } => "Speech generation progress",
            GenerationEvent::QuickStartReady { .. } => "Quick-start audio ready",
            GenerationEvent::FellBack { .. } => "Switched to fallback voice source",
            GenerationEvent::Completed { .. } => "Speech generation completed",
            GenerationEvent::Failed { .. } => "Speech generation failed",
            GenerationEvent::Cancelled { .. } => "Speech generation cancelled",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events emitted by the segment cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// An artifact was written.
    Stored { cache_key: String, bytes: u64 },
    /// An artifact was evicted.
    Evicted {
        /// On-disk entry name.
        entry: String,
        bytes: u64,
        /// "expired" or "capacity".
        reason: String,
    },
    /// An artifact was removed explicitly.
    Invalidated { cache_key: String },
    /// Writing an artifact failed; playback continues from memory/manifest.
    WriteFailed { cache_key: String, message: String },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Stored { .. } => "Artifact cached",
            CacheEvent::Evicted { .. } => "Artifact evicted",
            CacheEvent::Invalidated { .. } => "Artifact invalidated",
            CacheEvent::WriteFailed { .. } => "Artifact write failed",
        }
    }
}

// ============================================================================
// Sleep Timer Events
// ============================================================================

/// Events emitted by the sleep timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SleepTimerEvent {
    /// Timer armed.
    Started {
        /// "countdown" or "end_of_chapter".
        mode: String,
        /// Countdown length (seconds); absent for end-of-chapter.
        remaining_secs: Option<u64>,
    },
    /// Countdown ticked.
    Tick { remaining_secs: u64 },
    /// Timer fired and playback was paused or ended.
    Fired { mode: String },
    /// Timer cancelled before firing.
    Cancelled,
}

impl SleepTimerEvent {
    fn description(&self) -> &str {
        match self {
            SleepTimerEvent::Started { .. } => "Sleep timer started",
            SleepTimerEvent::Tick { .. } => "Sleep timer tick",
            SleepTimerEvent::Fired { .. } => "Sleep timer fired",
            SleepTimerEvent::Cancelled => "Sleep timer cancelled",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers that fall behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber that receives all future events.
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
/// let bus = EventBus::new(16);
/// let _playback_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Playback(_)));
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

    /// Only events that match `predicate` will be returned by `recv()`.
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

    /// Attempts to receive a matching event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
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

    /// Drains every matching event that is already buffered.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
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
