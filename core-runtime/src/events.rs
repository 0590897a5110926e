//! # Event Bus System
//!
//! Provides an event-driven architecture for the feedback console core using
//! `tokio::sync::broadcast`. Core modules publish typed events; hosts
//! subscribe to refresh views, show notifications or write audit logs.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies per domain
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ List Synchronizer├────────>│           ├────────────>│ Subscriber │
//! └──────────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────────┐  emit   │ (broadcast│
//! │ Poller           ├────────>│  channel) │  subscribe  ┌────────────┐
//! └──────────────────┘         │           ├────────────>│ Subscriber │
//! ┌──────────────────┐  emit   │           │             └────────────┘
//! │ Auto-Retry       ├────────>│           │
//! └──────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DataSourceEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::DataSource(DataSourceEvent::PollingStarted {
//!         interval_ms: 5_000,
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Status polling started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! The event bus uses `tokio::sync::broadcast`, which can produce two types of errors:
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Publishers ignore the "no subscribers" error (`emit(..).ok()`): events are
//! notifications, never part of an operation's success path.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Data-source (uploaded file job) events
    DataSource(DataSourceEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::DataSource(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::DataSource(DataSourceEvent::RefreshFailed { .. }) => EventSeverity::Error,
            CoreEvent::DataSource(DataSourceEvent::RetryExhausted { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::DataSource(DataSourceEvent::AutoRetryCompleted { failed, .. })
                if *failed > 0 =>
            {
                EventSeverity::Warning
            }
            CoreEvent::DataSource(DataSourceEvent::AutoRetryCompleted { .. })
            | CoreEvent::DataSource(DataSourceEvent::UploadCompleted { .. })
            | CoreEvent::DataSource(DataSourceEvent::JobsRemoved { .. })
            | CoreEvent::DataSource(DataSourceEvent::PollingSettled { .. }) => EventSeverity::Info,
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
// Data Source Events
// ============================================================================

/// Events emitted while tracking uploaded files through the analysis pipeline.
///
/// Status values are the wire strings (`pending`, `analyzing`, `completed`,
/// `failed`) so the runtime crate stays independent of the job model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DataSourceEvent {
    /// An authoritative list page was applied to the store.
    ListRefreshed {
        /// Page number that was fetched.
        page: u32,
        /// Total number of records reported by the backend.
        total: u64,
        /// Records that were not tracked before this refresh.
        inserted: usize,
        /// Records replaced by the backend's version.
        updated: usize,
        /// Records dropped because the page no longer lists them.
        evicted: usize,
        /// Jobs still pending or analyzing after the refresh.
        in_flight: usize,
    },
    /// A list refresh failed; previously loaded records were kept.
    RefreshFailed {
        /// Human-readable error message.
        message: String,
    },
    /// A job moved to a different status.
    JobStatusChanged {
        job_id: String,
        /// Previous status, `None` when the job was not tracked yet.
        from: Option<String>,
        to: String,
        /// True for local speculative transitions awaiting confirmation.
        optimistic: bool,
    },
    /// Jobs were removed locally after a successful delete.
    JobsRemoved { job_ids: Vec<String> },
    /// One or more uploads were accepted by the backend.
    UploadCompleted {
        job_ids: Vec<String>,
        /// Files the backend rejected in a batch upload.
        failed: usize,
    },
    /// The status poller was scheduled.
    PollingStarted { interval_ms: u64 },
    /// The status poller was stopped before it settled.
    PollingStopped,
    /// Polling observed no job in flight and went idle.
    PollingSettled {
        /// Failed jobs remaining at the moment of settling.
        failed: usize,
    },
    /// An auto-retry batch started.
    AutoRetryStarted { job_ids: Vec<String> },
    /// An auto-retry batch finished.
    AutoRetryCompleted {
        succeeded: usize,
        failed: usize,
        /// Jobs left alone because they reached the attempt cap.
        skipped: usize,
    },
    /// A job reached the auto-retry attempt cap and will no longer be retried
    /// automatically.
    RetryExhausted { job_id: String, attempts: u32 },
}

impl DataSourceEvent {
    fn description(&self) -> &str {
        match self {
            DataSourceEvent::ListRefreshed { .. } => "Data source list refreshed",
            DataSourceEvent::RefreshFailed { .. } => "Data source refresh failed",
            DataSourceEvent::JobStatusChanged { .. } => "Job status changed",
            DataSourceEvent::JobsRemoved { .. } => "Jobs removed",
            DataSourceEvent::UploadCompleted { .. } => "Upload completed",
            DataSourceEvent::PollingStarted { .. } => "Status polling started",
            DataSourceEvent::PollingStopped => "Status polling stopped",
            DataSourceEvent::PollingSettled { .. } => "Status polling settled",
            DataSourceEvent::AutoRetryStarted { .. } => "Auto-retry started",
            DataSourceEvent::AutoRetryCompleted { .. } => "Auto-retry completed",
            DataSourceEvent::RetryExhausted { .. } => "Auto-retry attempts exhausted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Past events are not replayed.
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

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, DataSourceEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let failures = EventStream::new(event_bus.subscribe()).filter(|event| {
///     matches!(event, CoreEvent::DataSource(DataSourceEvent::RefreshFailed { .. }))
/// });
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

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
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
