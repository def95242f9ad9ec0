//! PostgreSQL log configuration.

use std::time::Duration;

use serde::Deserialize;

/// Settings of a [`PgEventLog`](crate::PgEventLog).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PgEventLogConfig {
    /// Rows fetched per subscription poll.
    pub read_batch_size: usize,
    /// Pause between polls once a subscription has caught up.
    pub poll_interval_ms: u64,
}

impl PgEventLogConfig {
    /// [`poll_interval_ms`](Self::poll_interval_ms) as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for PgEventLogConfig {
    fn default() -> Self {
        Self {
            read_batch_size: 500,
            poll_interval_ms: 250,
        }
    }
}
