//! Anabasis Cache — continuously tailed, in-memory projections.
//!
//! A [`CatchupCache`] subscribes to the backing log (every stream, or a
//! single one), replays the backlog into a private catching-up set and swaps
//! it into the live set once the log reports it has caught up. From then on
//! events are applied as they arrive. Connection loss marks the cache stale
//! without discarding what it knows.

pub mod cache;
pub mod config;
pub mod status;

pub use cache::{CacheSeed, CatchupCache};
pub use config::{CacheSource, CatchupCacheConfig};
pub use status::{CacheChange, CacheStatus};
