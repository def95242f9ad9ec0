//! Snapshot store contract.

use std::path::PathBuf;

use anabasis_core::aggregate::Aggregate;
use async_trait::async_trait;

use crate::error::SnapshotError;

/// A stored snapshot, as returned by [`SnapshotStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    /// Stream the aggregate was taken from.
    pub stream_id: String,
    /// Aggregate version at the time of the snapshot.
    pub version: i64,
    /// Location of the serialized aggregate.
    pub path: PathBuf,
}

/// Picks one snapshot among candidates.
pub type SnapshotSelector<'a> = &'a (dyn Fn(&[SnapshotRef]) -> Option<&SnapshotRef> + Send + Sync);

/// Persistence of aggregate snapshots, addressed by stream id and filter tags.
///
/// Snapshots are immutable: each version is written once.
#[async_trait]
pub trait SnapshotStore<A: Aggregate>: Send + Sync {
    /// Writes `aggregate` under `filters` and `stream_id` at its current version.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::AlreadyExists` if that version was already
    /// saved, `SnapshotError::InvalidSegment` for unusable ids, or an I/O or
    /// serialization error.
    async fn save(
        &self,
        stream_id: &str,
        filters: &[&str],
        aggregate: &A,
    ) -> Result<SnapshotRef, SnapshotError>;

    /// Loads the latest snapshot of `stream_id` taken under `filter`.
    ///
    /// # Errors
    ///
    /// A missing snapshot is an error, not an empty result.
    async fn get(&self, stream_id: &str, filter: &str) -> Result<A, SnapshotError>;

    /// Loads the snapshot of `stream_id` at exactly `version`.
    ///
    /// # Errors
    ///
    /// A missing snapshot is an error, not an empty result.
    async fn get_version(
        &self,
        stream_id: &str,
        filters: &[&str],
        version: i64,
    ) -> Result<A, SnapshotError>;

    /// Lists every snapshot stored under `filters`, ordered by stream id then version.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the store cannot be enumerated.
    async fn list(&self, filters: &[&str]) -> Result<Vec<SnapshotRef>, SnapshotError>;

    /// Loads the snapshot `selector` picks among those stored under `filters`.
    ///
    /// Returns `Ok(None)` when the selector picks nothing.
    ///
    /// # Errors
    ///
    /// Same as [`list`](SnapshotStore::list), plus read errors of the chosen snapshot.
    async fn select(
        &self,
        filters: &[&str],
        selector: SnapshotSelector<'_>,
    ) -> Result<Option<A>, SnapshotError>;
}
