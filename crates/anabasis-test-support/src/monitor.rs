//! Test connection monitor — connectivity flipped on demand.

use std::sync::Arc;

use anabasis_core::connection::ConnectionMonitor;
use anabasis_core::log::EventLog;
use tokio::sync::watch;

/// A connection monitor whose status is driven by the test.
pub struct ManualConnectionMonitor {
    log: Arc<dyn EventLog>,
    status: watch::Sender<bool>,
}

impl ManualConnectionMonitor {
    /// Creates a monitor over `log`, initially connected or not.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, connected: bool) -> Self {
        let (status, _) = watch::channel(connected);
        Self { log, status }
    }

    /// Creates an already connected monitor.
    #[must_use]
    pub fn connected(log: Arc<dyn EventLog>) -> Self {
        Self::new(log, true)
    }

    /// Signals that the connection came up.
    pub fn connect(&self) {
        self.status.send_replace(true);
    }

    /// Signals that the connection was lost.
    pub fn disconnect(&self) {
        self.status.send_replace(false);
    }
}

impl ConnectionMonitor for ManualConnectionMonitor {
    fn watch_connection(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    fn connection(&self) -> Option<Arc<dyn EventLog>> {
        self.is_connected().then(|| Arc::clone(&self.log))
    }
}

impl std::fmt::Debug for ManualConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualConnectionMonitor")
            .field("connected", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}
