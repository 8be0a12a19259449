//! Connectivity status tracking

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::events::{EventBus, FeedEvent};

/// Whether the feed currently receives data from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    Connected,
    Disconnected,
}

impl ConnectivityStatus {
    pub const CONNECTED: &'static str = "connected";
    pub const DISCONNECTED: &'static str = "disconnected";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => Self::CONNECTED,
            Self::Disconnected => Self::DISCONNECTED,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the current status and announces changes
///
/// The value is published through a `watch` channel so the feed handle can
/// read it without talking to the connection task.
pub(crate) struct StatusTracker {
    tx: watch::Sender<ConnectivityStatus>,
    events: EventBus,
}

impl StatusTracker {
    /// New tracker starting at `Disconnected`; the initial value is not
    /// announced
    pub fn new(events: EventBus) -> (Self, watch::Receiver<ConnectivityStatus>) {
        let (tx, rx) = watch::channel(ConnectivityStatus::Disconnected);
        (Self { tx, events }, rx)
    }

    pub fn current(&self) -> ConnectivityStatus {
        *self.tx.borrow()
    }

    /// Set the status; emits one `status` event iff the value changed
    pub fn set(&self, status: ConnectivityStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            debug!(%status, "Connectivity status changed");
            self.events.emit(FeedEvent::Status(status));
        }

        changed
    }
}
