//! Public handle of a followed feed

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::StreamConfig;
use crate::connection::ConnectionManager;
use crate::error::{ChangesError, Result};
use crate::events::{EventBus, EventKind, EventSubscription};
use crate::status::{ConnectivityStatus, StatusTracker};
use crate::streaming::Cursor;
use crate::transport::{FeedRequest, HttpTransport, Transport};

/// A reconnecting follower of one database's continuous changes feed
///
/// # Lifecycle
///
/// - [`ChangesFeed::spawn`] validates the config and, if `auto_connect` is
///   set, starts following immediately
/// - [`ChangesFeed::new`] builds a stopped feed; call [`start`](Self::start)
///   once observers are attached
/// - [`shutdown`](Self::shutdown) stops the task; dropping the handle aborts
///   it
///
/// Starting requires a tokio runtime.
pub struct ChangesFeed {
    config: Arc<StreamConfig>,
    events: EventBus,
    status: watch::Receiver<ConnectivityStatus>,
    cursor: watch::Receiver<Option<Cursor>>,
    /// Built at construction, moved into the task by `start`
    manager: Option<ConnectionManager>,
    task: Option<RunningTask>,
}

struct RunningTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ChangesFeed {
    /// Build a stopped feed that talks HTTP(S) to the configured server
    pub fn new(config: StreamConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.connect_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a stopped feed on a custom transport
    pub fn with_transport(config: StreamConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        FeedRequest::build(&config, config.since.as_ref())?;

        let config = Arc::new(config);
        let events = EventBus::new(config.tuning.event_capacity);
        let (tracker, status) = StatusTracker::new(events.clone());
        let (cursor_tx, cursor) = watch::channel(config.since.clone());

        let manager = ConnectionManager::new(
            Arc::clone(&config),
            transport,
            tracker,
            cursor_tx,
            events.clone(),
        );

        Ok(Self {
            config,
            events,
            status,
            cursor,
            manager: Some(manager),
            task: None,
        })
    }

    /// Build the feed and start it unless `auto_connect` is off
    pub fn spawn(config: StreamConfig) -> Result<Self> {
        let mut feed = Self::new(config)?;
        if feed.config.auto_connect {
            feed.start()?;
        }
        Ok(feed)
    }

    /// Start following the feed
    pub fn start(&mut self) -> Result<()> {
        let manager = self.manager.take().ok_or(ChangesError::AlreadyStarted)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(manager.run(shutdown_rx));

        self.task = Some(RunningTask {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Whether the connection task is alive
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map_or(false, |task| !task.handle.is_finished())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Observe every signal
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe(None)
    }

    /// Observe one kind of signal
    pub fn subscribe_to(&self, kind: EventKind) -> EventSubscription {
        self.events.subscribe(Some(kind))
    }

    /// Number of attached observers
    pub fn observer_count(&self) -> usize {
        self.events.observer_count()
    }

    pub fn status(&self) -> ConnectivityStatus {
        *self.status.borrow()
    }

    /// Receiver that can await status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status.clone()
    }

    /// Last accepted sequence; persist it and pass it back as `since` to
    /// resume after a restart
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor.borrow().clone()
    }

    /// Stop following and wait for the task to finish
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            debug!(database = %self.config.database, "Shutting down change feed");
            let _ = task.shutdown_tx.send(());
            let _ = task.handle.await;
        }
    }
}

impl Drop for ChangesFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.handle.abort();
        }
    }
}
