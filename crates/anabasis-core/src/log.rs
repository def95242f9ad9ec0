//! Backing event log abstraction.
//!
//! The log is a set of named, append-only streams. Every stream is versioned
//! by the sequence number of its last event (`-1` when it has none) and every
//! recorded event also carries a global position across all streams.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::aggregate::NO_VERSION;
use crate::error::DomainError;

/// Version a writer expects a stream to be at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip the concurrency check.
    Any,
    /// The stream must not contain any event yet.
    NoStream,
    /// The stream's last event must have this sequence number.
    Exact(i64),
}

impl ExpectedVersion {
    /// Expectation matching an aggregate at `version`.
    #[must_use]
    pub fn from_version(version: i64) -> Self {
        if version <= NO_VERSION {
            Self::NoStream
        } else {
            Self::Exact(version)
        }
    }

    /// Returns `true` if a stream currently at `current` satisfies this expectation.
    #[must_use]
    pub fn matches(self, current: i64) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => current == NO_VERSION,
            Self::Exact(version) => current == version,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

/// An event ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub data: Vec<u8>,
    /// Serialized header block.
    pub metadata: Vec<u8>,
}

/// An event as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Stream the event belongs to.
    pub stream_id: String,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Sequence number within the stream, starting at 0.
    pub sequence_number: i64,
    /// Global position across all streams.
    pub position: i64,
    /// Serialized event payload.
    pub data: Vec<u8>,
    /// Serialized header block.
    pub metadata: Vec<u8>,
    /// Time the log recorded the event.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Sequence number of the last event now in the stream.
    pub next_expected_version: i64,
    /// Global position of the last written event.
    pub position: i64,
}

/// Status of a forward read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// The stream exists and was read.
    Success,
    /// The stream has never been written to.
    StreamNotFound,
    /// The stream has been deleted.
    StreamDeleted,
}

/// One page of a forward stream read.
#[derive(Debug, Clone)]
pub struct StreamSlice {
    /// Read status.
    pub status: SliceStatus,
    /// Events in sequence order.
    pub events: Vec<RecordedEvent>,
    /// Sequence number to continue reading from.
    pub next_sequence_number: i64,
    /// `true` when no event exists past this page.
    pub is_end_of_stream: bool,
}

impl StreamSlice {
    /// A slice for a stream that cannot be read.
    #[must_use]
    pub fn unavailable(status: SliceStatus, from: i64) -> Self {
        Self {
            status,
            events: Vec::new(),
            next_sequence_number: from,
            is_end_of_stream: true,
        }
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// Every stream, in global position order.
    AllStreams,
    /// One stream, in sequence order.
    Stream(String),
}

/// Where a subscription starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStart {
    /// Replay from the first event.
    Beginning,
    /// Resume strictly after this checkpoint: a global position for
    /// [`SubscriptionTarget::AllStreams`], a sequence number for a stream.
    After(i64),
}

impl SubscriptionStart {
    /// Start resuming after `checkpoint`, or from the beginning if nothing was processed.
    #[must_use]
    pub fn resume_after(checkpoint: Option<i64>) -> Self {
        checkpoint.map_or(Self::Beginning, Self::After)
    }
}

/// Notification pushed by a catch-up subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMessage {
    /// A recorded event.
    Event(RecordedEvent),
    /// The historical backlog has been delivered; live events follow.
    CaughtUp,
    /// The log ended the subscription.
    Dropped(String),
}

/// Receiving end of a catch-up subscription.
///
/// Dropping it, or calling [`stop`](Subscription::stop), tells the producer to
/// stop.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<SubscriptionMessage>,
}

impl Subscription {
    /// Creates a connected feed/subscription pair.
    #[must_use]
    pub fn channel(capacity: usize) -> (SubscriptionFeed, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (SubscriptionFeed { sender }, Self { receiver })
    }

    /// Waits for the next message; `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        self.receiver.recv().await
    }

    /// Stops the producer. Messages already queued can still be drained.
    pub fn stop(&mut self) {
        self.receiver.close();
    }
}

/// Producing end of a catch-up subscription, held by log implementations.
#[derive(Debug, Clone)]
pub struct SubscriptionFeed {
    sender: mpsc::Sender<SubscriptionMessage>,
}

impl SubscriptionFeed {
    /// Pushes a message; returns `false` once the subscriber has stopped.
    pub async fn send(&self, message: SubscriptionMessage) -> bool {
        self.sender.send(message).await.is_ok()
    }

    /// Resolves when the subscriber stops or is dropped.
    pub async fn closed(&self) {
        self.sender.closed().await;
    }

    /// Returns `true` once the subscriber has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Contract of the backing event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends `events` atomically if the stream is at `expected`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` when the stream has moved
    /// past `expected`, `DomainError::StreamDeleted` for deleted streams, and
    /// `DomainError::Infrastructure` for transport failures.
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult, DomainError>;

    /// Opens a multi-step write against `stream` at `expected`. Nothing becomes
    /// visible until [`LogTransaction::commit`]; dropping the transaction
    /// abandons it.
    ///
    /// # Errors
    ///
    /// Same as [`append_to_stream`](EventLog::append_to_stream).
    async fn start_transaction(
        &self,
        stream: &str,
        expected: ExpectedVersion,
    ) -> Result<Box<dyn LogTransaction>, DomainError>;

    /// Reads up to `max_count` events of `stream` starting at sequence `from`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` for transport failures. Missing
    /// and deleted streams are reported through [`SliceStatus`].
    async fn read_stream_forward(
        &self,
        stream: &str,
        from: i64,
        max_count: usize,
    ) -> Result<StreamSlice, DomainError>;

    /// Opens a catch-up subscription: backlog from `start`, then
    /// [`SubscriptionMessage::CaughtUp`], then live events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the subscription cannot be opened.
    async fn subscribe(
        &self,
        target: SubscriptionTarget,
        start: SubscriptionStart,
    ) -> Result<Subscription, DomainError>;
}

/// An open multi-step write.
#[async_trait]
pub trait LogTransaction: Send {
    /// Buffers one page of events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the page cannot be written; the transaction
    /// must then be dropped.
    async fn write(&mut self, events: Vec<EventData>) -> Result<(), DomainError>;

    /// Makes every written page visible at once.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream moved since the
    /// transaction started, or `DomainError::Infrastructure`.
    async fn commit(self: Box<Self>) -> Result<WriteResult, DomainError>;
}
