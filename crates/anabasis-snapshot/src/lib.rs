//! Anabasis Snapshot — point-in-time aggregate persistence.
//!
//! Snapshots bound replay cost: restore an aggregate from the store, then
//! let the repository (or a single-stream cache) apply only the events
//! recorded after it.

pub mod config;
pub mod error;
pub mod file_system;
pub mod store;

pub use config::SnapshotStoreConfig;
pub use error::SnapshotError;
pub use file_system::FileSystemSnapshotStore;
pub use store::{SnapshotRef, SnapshotStore};
