//! Event surface of a feed
//!
//! Every feed publishes three kinds of signal on one broadcast channel.
//! Observers subscribe to all of them or to a single kind; each observer has
//! its own buffer, so a slow one only loses its own backlog.

use std::fmt;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::error::FeedError;
use crate::status::ConnectivityStatus;
use crate::streaming::ChangeRecord;

/// A signal emitted by a feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// One accepted change
    Data(ChangeRecord),
    /// Connectivity transition
    Status(ConnectivityStatus),
    /// Transport failure, server-reported feed error, or dropped record
    Error(FeedError),
}

impl FeedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Data(_) => EventKind::Data,
            Self::Status(_) => EventKind::Status,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Signal kinds an observer can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    Status,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Status => "status",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sending side shared by the feed handle and its connection task
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<FeedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire and forget; having no observers is not an error
    pub fn emit(&self, event: FeedEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, kind: Option<EventKind>) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            kind,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One observer of a feed
///
/// Receives every event emitted after it was created. Dropping it (or
/// calling [`unsubscribe`](Self::unsubscribe)) detaches it.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<FeedEvent>,
    kind: Option<EventKind>,
}

impl EventSubscription {
    /// The kind this observer is limited to, if any
    pub fn kind(&self) -> Option<EventKind> {
        self.kind
    }

    fn accepts(&self, event: &FeedEvent) -> bool {
        self.kind.map_or(true, |kind| event.kind() == kind)
    }

    /// Wait for the next matching event
    ///
    /// Returns `None` once the feed has been dropped and the backlog is
    /// drained.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer fell behind the feed; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered
    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer fell behind the feed; events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every matching event already buffered
    pub fn drain(&mut self) -> Vec<FeedEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Convert into a `Stream` of matching events
    pub fn into_stream(self) -> impl Stream<Item = FeedEvent> + Send + 'static {
        let kind = self.kind;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(event) if kind.map_or(true, |k| event.kind() == k) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "Observer fell behind the feed; events dropped");
                None
            }
        })
    }

    /// Detach from the feed
    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(seq: u64) -> FeedEvent {
        FeedEvent::Data(serde_json::from_value(serde_json::json!({ "seq": seq })).unwrap())
    }

    #[tokio::test]
    async fn test_every_observer_gets_every_event() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe(None);
        let mut second = bus.subscribe(None);

        bus.emit(change(1));
        bus.emit(FeedEvent::Status(ConnectivityStatus::Connected));

        assert_eq!(first.recv().await, Some(change(1)));
        assert_eq!(second.recv().await, Some(change(1)));
        assert_eq!(
            first.recv().await,
            Some(FeedEvent::Status(ConnectivityStatus::Connected))
        );
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let bus = EventBus::new(16);
        let mut errors = bus.subscribe(Some(EventKind::Error));

        bus.emit(change(1));
        bus.emit(FeedEvent::Error(FeedError::Transport("reset".into())));

        assert_eq!(
            errors.recv().await,
            Some(FeedEvent::Error(FeedError::Transport("reset".into())))
        );
        assert!(errors.try_recv().is_none());
    }

    #[test]
    fn test_recv_waits_for_matching_event() {
        let bus = EventBus::new(4);
        let mut status = bus.subscribe(Some(EventKind::Status));
        let mut recv = tokio_test::task::spawn(status.recv());

        tokio_test::assert_pending!(recv.poll());
        bus.emit(change(1));
        tokio_test::assert_pending!(recv.poll());

        bus.emit(FeedEvent::Status(ConnectivityStatus::Disconnected));
        assert!(recv.is_woken());
        tokio_test::assert_ready_eq!(
            recv.poll(),
            Some(FeedEvent::Status(ConnectivityStatus::Disconnected))
        );
    }

    #[test]
    fn test_emit_without_observers() {
        let bus = EventBus::new(4);
        bus.emit(change(1));
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn test_slow_observer_does_not_block_others() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe(None);
        let mut fast = bus.subscribe(None);

        bus.emit(change(1));
        assert_eq!(fast.try_recv(), Some(change(1)));
        bus.emit(change(2));
        assert_eq!(fast.try_recv(), Some(change(2)));
        bus.emit(change(3));
        assert_eq!(fast.try_recv(), Some(change(3)));

        // Oldest event was overwritten for the slow observer only
        assert_eq!(slow.drain(), vec![change(2), change(3)]);
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(None);
        assert_eq!(bus.observer_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let bus = EventBus::new(8);
        let stream = bus.subscribe(Some(EventKind::Data)).into_stream();

        bus.emit(FeedEvent::Status(ConnectivityStatus::Connected));
        bus.emit(change(7));
        drop(bus);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![change(7)]);
    }
}
