//! Snapshot error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by snapshot stores.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading or writing the snapshot failed, including a missing snapshot.
    #[error("snapshot I/O failed at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The aggregate could not be serialized or the stored document decoded.
    #[error("snapshot at {path} could not be (de)serialized: {source}")]
    Serialization {
        /// Path of the snapshot.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A snapshot of this version has already been written.
    #[error("snapshot already exists at {0}")]
    AlreadyExists(PathBuf),

    /// A stream id or filter cannot be used as a path segment.
    #[error("invalid snapshot path segment: {0:?}")]
    InvalidSegment(String),
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` if the error means that no snapshot was found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
