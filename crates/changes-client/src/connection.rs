//! Connection task
//!
//! One task per feed owns every piece of mutable connection state: the
//! transport handle, the framer buffer, the liveness timestamp and the
//! status. Opening, streaming and backing off are phases of a single link,
//! so there is never more than one request in flight, and every way a link
//! can end (error, clean close, watchdog) goes through [`terminate`].
//!
//! [`terminate`]: ConnectionManager::terminate

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, trace, warn};

use crate::config::StreamConfig;
use crate::error::FeedError;
use crate::events::{EventBus, FeedEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::status::{ConnectivityStatus, StatusTracker};
use crate::streaming::{Cursor, FeedRecord, LineFramer};
use crate::transport::{ChunkStream, FeedRequest, Transport};

/// Phase of the single link to the server
enum Link {
    /// Request sent, waiting for the response head
    Opening(BoxFuture<'static, Result<ChunkStream, FeedError>>),
    /// Response body streaming
    Streaming(ChunkStream),
    /// Waiting out the reconnect delay
    Backoff(Pin<Box<Sleep>>),
}

/// What happened on the link
enum LinkEvent {
    Opened(Result<ChunkStream, FeedError>),
    Chunk(Bytes),
    Failed(FeedError),
    Ended,
    BackoffElapsed,
}

impl Link {
    /// A transport handle exists while a request is open or being opened
    fn has_handle(&self) -> bool {
        !matches!(self, Link::Backoff(_))
    }

    /// Wait for the next event; cancel-safe
    async fn next(&mut self) -> LinkEvent {
        match self {
            Link::Opening(open) => LinkEvent::Opened(open.as_mut().await),
            Link::Streaming(body) => match body.next().await {
                Some(Ok(chunk)) => LinkEvent::Chunk(chunk),
                Some(Err(e)) => LinkEvent::Failed(e),
                None => LinkEvent::Ended,
            },
            Link::Backoff(delay) => {
                delay.as_mut().await;
                LinkEvent::BackoffElapsed
            }
        }
    }
}

enum Step {
    Tick,
    Link(LinkEvent),
    Shutdown,
}

/// Owner of the connection state of one feed
pub(crate) struct ConnectionManager {
    config: Arc<StreamConfig>,
    transport: Arc<dyn Transport>,
    framer: LineFramer,
    status: StatusTracker,
    cursor: watch::Sender<Option<Cursor>>,
    events: EventBus,
    monitor: HeartbeatMonitor,
    last_activity: Instant,
    attempt: u64,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<StreamConfig>,
        transport: Arc<dyn Transport>,
        status: StatusTracker,
        cursor: watch::Sender<Option<Cursor>>,
        events: EventBus,
    ) -> Self {
        Self {
            framer: LineFramer::with_limit(config.tuning.max_line_bytes),
            monitor: HeartbeatMonitor::from_config(&config),
            config,
            transport,
            status,
            cursor,
            events,
            last_activity: Instant::now(),
            attempt: 0,
        }
    }

    /// Follow the feed until `shutdown` fires or its sender is dropped
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            database = %self.config.database,
            heartbeat_ms = self.config.heartbeat_millis(),
            staleness_ms = self.monitor.threshold().as_millis() as u64,
            "Change feed started"
        );

        let mut ticker = self.monitor.ticker();
        let mut link = self.connect();

        loop {
            let step = tokio::select! {
                _ = &mut shutdown => Step::Shutdown,
                _ = ticker.tick() => Step::Tick,
                event = link.next() => Step::Link(event),
            };

            link = match step {
                Step::Shutdown => break,
                Step::Tick => self.check_heartbeat(link),
                Step::Link(event) => self.handle(event, link),
            };
        }

        drop(link);
        self.status.set(ConnectivityStatus::Disconnected);
        info!(
            database = %self.config.database,
            cursor = ?self.cursor.borrow().as_ref().map(Cursor::as_str),
            "Change feed stopped"
        );
    }

    /// Start one connection attempt
    fn connect(&mut self) -> Link {
        self.attempt += 1;

        let request = {
            let since = self.cursor.borrow();
            FeedRequest::build(&self.config, since.as_ref())
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                let error = FeedError::Transport(format!("Invalid feed URL: {}", e));
                warn!(attempt = self.attempt, %error, "Cannot build feed request");
                self.events.emit(FeedEvent::Error(error));
                return self.terminate();
            }
        };

        debug!(attempt = self.attempt, url = %request.url, "Connecting to change feed");
        self.last_activity = Instant::now();

        let transport = Arc::clone(&self.transport);
        Link::Opening(Box::pin(async move { transport.open(&request).await }))
    }

    fn handle(&mut self, event: LinkEvent, link: Link) -> Link {
        match event {
            LinkEvent::Opened(Ok(body)) => {
                if self.framer.pending_len() > 0 {
                    debug!(
                        bytes = self.framer.pending_len(),
                        "Discarding partial line from previous connection"
                    );
                }
                self.framer.reset();
                self.last_activity = Instant::now();
                info!(attempt = self.attempt, "Change feed opened");
                Link::Streaming(body)
            }
            LinkEvent::Opened(Err(error)) => {
                warn!(attempt = self.attempt, %error, "Failed to open change feed");
                self.events.emit(FeedEvent::Error(error));
                self.terminate()
            }
            LinkEvent::Chunk(chunk) => {
                self.on_chunk(&chunk);
                link
            }
            LinkEvent::Failed(error) => {
                warn!(attempt = self.attempt, %error, "Change feed broke");
                drop(link);
                self.events.emit(FeedEvent::Error(error));
                self.terminate()
            }
            LinkEvent::Ended => {
                info!(attempt = self.attempt, "Change feed closed by server");
                drop(link);
                self.terminate()
            }
            LinkEvent::BackoffElapsed => self.connect(),
        }
    }

    /// Only a chunk carrying record bytes marks the feed `Connected`. A
    /// fresh connection to a quiet database that sends nothing but
    /// keep-alive newlines therefore stays `Disconnected` until its first
    /// record, even though the watchdog sees it as alive.
    fn on_chunk(&mut self, chunk: &[u8]) {
        self.last_activity = Instant::now();

        if chunk.iter().all(u8::is_ascii_whitespace) {
            trace!(bytes = chunk.len(), "Keep-alive");
        } else if !self.status.current().is_connected() {
            self.status.set(ConnectivityStatus::Connected);
        }

        for record in self.framer.feed(chunk) {
            match record {
                Ok(FeedRecord::Change(change)) => {
                    if let Some(seq) = &change.seq {
                        trace!(cursor = %seq, "Change received");
                        self.cursor.send_replace(Some(seq.clone()));
                    }
                    self.events.emit(FeedEvent::Data(change));
                }
                Ok(FeedRecord::Checkpoint { last_seq, pending }) => {
                    debug!(cursor = %last_seq, ?pending, "Feed checkpoint");
                    self.cursor.send_replace(Some(last_seq));
                }
                Ok(FeedRecord::Failure { error, reason }) => {
                    warn!(%error, %reason, "Server reported a feed error");
                    self.events
                        .emit(FeedEvent::Error(FeedError::Feed { error, reason }));
                }
                Err(error) => {
                    warn!(%error, "Dropping unreadable record");
                    self.events.emit(FeedEvent::Error(error));
                }
            }
        }
    }

    /// Force-close a silent link; the monitor never opens one
    fn check_heartbeat(&mut self, link: Link) -> Link {
        if !link.has_handle() {
            return link;
        }

        let now = Instant::now();
        if !self.monitor.is_stale(self.last_activity, now) {
            return link;
        }

        warn!(
            attempt = self.attempt,
            silent_ms = now.saturating_duration_since(self.last_activity).as_millis() as u64,
            threshold_ms = self.monitor.threshold().as_millis() as u64,
            "No activity on change feed, forcing reconnect"
        );
        drop(link);
        self.terminate()
    }

    /// Shared end of every link: mark disconnected, schedule one reconnect
    fn terminate(&mut self) -> Link {
        self.status.set(ConnectivityStatus::Disconnected);

        let delay = self.config.reconnect_delay();
        debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        Link::Backoff(Box::pin(tokio::time::sleep(delay)))
    }
}
