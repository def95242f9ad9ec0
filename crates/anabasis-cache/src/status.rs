//! Observable cache state.

use std::sync::Arc;

use anabasis_core::error::DomainError;

/// Level-triggered view of a cache's health.
///
/// A cache goes through many catch-up cycles over its lifetime (one per
/// connect), so callers watch this value rather than awaiting a one-shot
/// signal.
#[derive(Debug, Clone)]
pub struct CacheStatus {
    /// The connection monitor last reported the log as reachable.
    pub is_connected: bool,
    /// The historical backlog of the current session has been replayed.
    pub is_caught_up: bool,
    /// The live set may be behind the log.
    pub is_stale: bool,
    /// Error that stopped the cache, if any. Cleared on the next connect.
    pub fault: Option<Arc<DomainError>>,
}

impl CacheStatus {
    /// `true` once the live set reflects the log and nothing has gone wrong since.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.is_caught_up && !self.is_stale && self.fault.is_none()
    }
}

impl Default for CacheStatus {
    fn default() -> Self {
        Self {
            is_connected: false,
            is_caught_up: false,
            is_stale: true,
            fault: None,
        }
    }
}

/// Published whenever an entry of the live set changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange<K> {
    /// Key of the changed aggregate.
    pub key: K,
    /// Version the aggregate is now at.
    pub version: i64,
}
