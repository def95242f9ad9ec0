//! Snapshot store configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Settings of a [`FileSystemSnapshotStore`](crate::FileSystemSnapshotStore).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapshotStoreConfig {
    /// Root directory under which snapshots are laid out.
    pub repository_directory: PathBuf,
}

impl Default for SnapshotStoreConfig {
    fn default() -> Self {
        Self {
            repository_directory: PathBuf::from("snapshots"),
        }
    }
}
