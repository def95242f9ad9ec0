//! Connection status abstraction.

use std::sync::Arc;

use tokio::sync::watch;

use crate::log::EventLog;

/// Publishes connectivity to the backing log and hands out the live handle.
pub trait ConnectionMonitor: Send + Sync {
    /// Level-triggered connectivity signal.
    fn watch_connection(&self) -> watch::Receiver<bool>;

    /// The live connection, `None` while disconnected.
    fn connection(&self) -> Option<Arc<dyn EventLog>>;

    /// Returns the current connectivity.
    fn is_connected(&self) -> bool {
        *self.watch_connection().borrow()
    }
}

/// Monitor for logs that are always reachable, such as a connection pool that
/// reconnects on its own.
pub struct StaticConnection {
    log: Arc<dyn EventLog>,
    status: watch::Sender<bool>,
}

impl StaticConnection {
    /// Wraps `log` as a permanently connected monitor.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        let (status, _) = watch::channel(true);
        Self { log, status }
    }
}

impl ConnectionMonitor for StaticConnection {
    fn watch_connection(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    fn connection(&self) -> Option<Arc<dyn EventLog>> {
        Some(Arc::clone(&self.log))
    }
}

impl std::fmt::Debug for StaticConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticConnection").finish_non_exhaustive()
    }
}
