//! Domain error types.

use thiserror::Error;

use crate::codec::CodecError;
use crate::log::ExpectedVersion;

/// Top-level error type shared by the repository, the cache and log adapters.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A read or write was attempted while the event log is unreachable.
    #[error("not connected to the event log")]
    NotConnected,

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on stream {stream}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream: String,
        /// The version the writer expected.
        expected: ExpectedVersion,
        /// The version the stream was actually at (-1 when it does not exist).
        actual: i64,
    },

    /// A recorded event's type has no registered decoder.
    #[error("unsupported event type {event_type} on stream {stream}")]
    UnsupportedEvent {
        /// The stream the event was read from.
        stream: String,
        /// The declared event type name.
        event_type: String,
    },

    /// A registered event type whose payload could not be decoded.
    #[error("failed to decode {event_type} at {stream}#{sequence_number}: {source}")]
    Decode {
        /// The stream the event was read from.
        stream: String,
        /// The declared event type name.
        event_type: String,
        /// Sequence number of the event within its stream.
        sequence_number: i64,
        /// The underlying codec failure.
        #[source]
        source: CodecError,
    },

    /// Serialization failure while preparing events for a write.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The target stream has been deleted and no longer accepts writes.
    #[error("stream {0} has been deleted")]
    StreamDeleted(String),

    /// A validation error in caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors a caller may resolve by reloading and retrying.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}
