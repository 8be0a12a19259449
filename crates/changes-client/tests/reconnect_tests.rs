//! Connection lifecycle tests
//!
//! These drive the connection task through a scripted transport on a paused
//! clock, so timer-dependent behaviour (backoff, staleness) is exact.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use changes_client::testing::{ScriptedConnection, ScriptedTransport};
use changes_client::{
    ChangeRecord, ChangesFeed, ConnectivityStatus, Cursor, EventKind, FeedError, FeedEvent,
    StreamConfig,
};
use pretty_assertions::assert_eq;
use tokio::time::sleep;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn change(json: &str) -> FeedEvent {
    FeedEvent::Data(serde_json::from_str::<ChangeRecord>(json).unwrap())
}

fn connected() -> FeedEvent {
    FeedEvent::Status(ConnectivityStatus::Connected)
}

fn disconnected() -> FeedEvent {
    FeedEvent::Status(ConnectivityStatus::Disconnected)
}

fn start_feed(config: StreamConfig, transport: &Arc<ScriptedTransport>) -> ChangesFeed {
    init_tracing();
    let mut feed = ChangesFeed::with_transport(config, transport.clone()).unwrap();
    feed.start().unwrap();
    feed
}

// =============================================================================
// Records and cursor
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_records_are_surfaced_in_order() {
    let transport = Arc::new(ScriptedTransport::new().then(
        ScriptedConnection::chunks_then_silence(["{\"seq\":1}\n{\"se", "q\":2}\n{\"seq\":3}\n"]),
    ));
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        events.drain(),
        vec![
            connected(),
            change(r#"{"seq":1}"#),
            change(r#"{"seq":2}"#),
            change(r#"{"seq":3}"#),
        ]
    );
    assert_eq!(feed.cursor(), Some(Cursor::from("3")));
    assert_eq!(feed.status(), ConnectivityStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_cursor_round_trips_into_next_request() {
    let transport = Arc::new(
        ScriptedTransport::new().then(ScriptedConnection::chunks(["{\"seq\":47,\"id\":\"a\"}\n"])),
    );
    let feed = start_feed(StreamConfig::new("db"), &transport);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(feed.cursor(), Some(Cursor::from("47")));
    assert_eq!(transport.attempts(), 1);
    assert!(transport.requests()[0].query_param("since").is_none());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.attempts(), 2);
    let next = transport.last_request().unwrap();
    assert_eq!(next.query_param("since").as_deref(), Some("47"));
}

#[tokio::test(start_paused = true)]
async fn test_configured_since_is_sent_on_first_request() {
    let transport = Arc::new(ScriptedTransport::new());
    let feed = start_feed(StreamConfig::new("db").with_since("12-g1AAAA"), &transport);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        transport.requests()[0].query_param("since").as_deref(),
        Some("12-g1AAAA")
    );
    assert_eq!(feed.cursor(), Some(Cursor::from("12-g1AAAA")));
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_advances_cursor_without_data() {
    let transport = Arc::new(ScriptedTransport::new().then(
        ScriptedConnection::chunks_then_silence(["{\"seq\":\"4-a\"}\n{\"last_seq\":\"5-b\",\"pending\":0}\n"]),
    ));
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut data = feed.subscribe_to(EventKind::Data);
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;

    assert_eq!(data.drain(), vec![change(r#"{"seq":"4-a"}"#)]);
    assert_eq!(feed.cursor(), Some(Cursor::from("5-b")));
}

#[tokio::test(start_paused = true)]
async fn test_domain_error_record_is_an_error_not_data() {
    let transport = Arc::new(ScriptedTransport::new().then(
        ScriptedConnection::chunks_then_silence(["{\"error\":\"forbidden\",\"reason\":\"no access\"}\n"]),
    ));
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut data = feed.subscribe_to(EventKind::Data);
    let mut errors = feed.subscribe_to(EventKind::Error);
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        errors.drain(),
        vec![FeedEvent::Error(FeedError::Feed {
            error: "forbidden".to_string(),
            reason: "no access".to_string(),
        })]
    );
    assert!(data.drain().is_empty());
    assert!(feed.cursor().is_none());
    // The connection itself stays up
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_record_does_not_block_the_next() {
    let transport = Arc::new(ScriptedTransport::new().then(
        ScriptedConnection::chunks_then_silence(["{\"seq\":1,oops}\n{\"seq\":2}\n"]),
    ));
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;

    let received = events.drain();
    assert_eq!(received.len(), 3);
    assert_eq!(received[0], connected());
    assert!(matches!(
        received[1],
        FeedEvent::Error(FeedError::Parse { .. })
    ));
    assert_eq!(received[2], change(r#"{"seq":2}"#));
    assert_eq!(feed.cursor(), Some(Cursor::from("2")));
}

#[tokio::test(start_paused = true)]
async fn test_mistyped_record_is_data_and_moves_cursor() {
    let transport = Arc::new(ScriptedTransport::new().then(
        ScriptedConnection::chunks_then_silence(["{\"seq\":5,\"id\":1}\n"]),
    ));
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;

    let received = events.drain();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], connected());
    match &received[1] {
        FeedEvent::Data(change) => {
            assert!(change.id.is_none());
            assert_eq!(change.get::<i64>("id"), Some(1));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(feed.cursor(), Some(Cursor::from("5")));
}

// =============================================================================
// Status
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_keepalive_alone_does_not_connect() {
    let transport = Arc::new(ScriptedTransport::new());
    let tx = transport.push_channel();
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    tx.send(Ok(Bytes::from_static(b"\n"))).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(events.drain().is_empty());
    assert_eq!(feed.status(), ConnectivityStatus::Disconnected);

    tx.send(Ok(Bytes::from_static(b"{\"seq\":1}\n"))).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(events.drain(), vec![connected(), change(r#"{"seq":1}"#)]);

    tx.send(Ok(Bytes::from_static(b"\n"))).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(events.drain().is_empty());
    assert_eq!(feed.status(), ConnectivityStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_keepalives_hold_the_connection_open() {
    let transport = Arc::new(ScriptedTransport::new());
    let tx = transport.push_channel();
    let _feed = start_feed(StreamConfig::new("db"), &transport);

    for _ in 0..10 {
        tx.send(Ok(Bytes::from_static(b"\n"))).unwrap();
        sleep(Duration::from_secs(5)).await;
    }

    assert_eq!(transport.attempts(), 1);
}

// =============================================================================
// Termination paths
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_staleness_teardown_reconnects_exactly_once() {
    let transport = Arc::new(
        ScriptedTransport::new().then(ScriptedConnection::chunks_then_silence(["{\"seq\":1}\n"])),
    );
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(500)).await;
    assert_eq!(events.drain(), vec![connected(), change(r#"{"seq":1}"#)]);

    // Threshold is 5 x 2000 ms; the first tick past it is at 11 s
    sleep(Duration::from_secs(10)).await;
    assert!(events.drain().is_empty());
    assert_eq!(transport.attempts(), 1);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(events.drain(), vec![disconnected()]);
    assert_eq!(transport.attempts(), 1);

    // Fixed 1 s backoff
    sleep(Duration::from_millis(900)).await;
    assert_eq!(transport.attempts(), 2);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.attempts(), 2);
    assert!(events.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_open_is_aborted_by_watchdog() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .then(ScriptedConnection::Stall)
            .then(ScriptedConnection::chunks_then_silence(["{\"seq\":9}\n"])),
    );
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_secs(11) + Duration::from_millis(500)).await;
    assert_eq!(transport.attempts(), 1);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.attempts(), 2);
    assert_eq!(events.drain(), vec![connected(), change(r#"{"seq":9}"#)]);
    assert_eq!(feed.cursor(), Some(Cursor::from("9")));
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_reports_and_retries_after_delay() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .then(ScriptedConnection::Refuse(FeedError::Transport(
                "connection refused".to_string(),
            )))
            .then(ScriptedConnection::Refuse(FeedError::server(503, "busy"))),
    );
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(900)).await;
    assert_eq!(transport.attempts(), 1);
    assert_eq!(
        events.drain(),
        vec![FeedEvent::Error(FeedError::Transport(
            "connection refused".to_string()
        ))]
    );

    sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.attempts(), 2);
    assert_eq!(
        events.drain(),
        vec![FeedEvent::Error(FeedError::server(503, "busy"))]
    );

    sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_reports_then_reconnects_with_fresh_buffer() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .then(ScriptedConnection::chunks_then_error(
                ["{\"seq\":1}\n{\"seq\""],
                FeedError::Transport("connection reset".to_string()),
            ))
            .then(ScriptedConnection::chunks_then_silence(["{\"seq\":3}\n"])),
    );
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        events.drain(),
        vec![
            connected(),
            change(r#"{"seq":1}"#),
            FeedEvent::Error(FeedError::Transport("connection reset".to_string())),
            disconnected(),
        ]
    );

    sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.attempts(), 2);
    assert_eq!(events.drain(), vec![connected(), change(r#"{"seq":3}"#)]);
    assert_eq!(
        transport.last_request().unwrap().query_param("since").as_deref(),
        Some("1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_clean_end_is_not_an_error() {
    let transport = Arc::new(
        ScriptedTransport::new().then(ScriptedConnection::chunks(["{\"seq\":1}\n"])),
    );
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        events.drain(),
        vec![connected(), change(r#"{"seq":1}"#), disconnected()]
    );

    sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_custom_reconnect_delay() {
    let mut config = StreamConfig::new("db");
    config.tuning.reconnect_delay_ms = 5000;
    let transport = Arc::new(
        ScriptedTransport::new().then(ScriptedConnection::Refuse(FeedError::Transport(
            "refused".to_string(),
        ))),
    );
    let _feed = start_feed(config, &transport);

    sleep(Duration::from_millis(4900)).await;
    assert_eq!(transport.attempts(), 1);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.attempts(), 2);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reconnecting() {
    let transport = Arc::new(
        ScriptedTransport::new().then(ScriptedConnection::chunks_then_silence(["{\"seq\":1}\n"])),
    );
    let feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut events = feed.subscribe();
    let mut feed = feed;
    feed.start().unwrap();

    sleep(Duration::from_millis(100)).await;
    feed.shutdown().await;

    assert_eq!(events.recv().await, Some(connected()));
    assert_eq!(events.recv().await, Some(change(r#"{"seq":1}"#)));
    assert_eq!(events.recv().await, Some(disconnected()));
    assert_eq!(events.recv().await, None);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_feeds_are_isolated() {
    let first = Arc::new(
        ScriptedTransport::new().then(ScriptedConnection::chunks_then_silence(["{\"seq\":1}\n"])),
    );
    let second = Arc::new(ScriptedTransport::new().then(ScriptedConnection::Refuse(
        FeedError::Transport("refused".to_string()),
    )));

    let feed_a = start_feed(StreamConfig::new("alpha"), &first);
    let feed_b = start_feed(StreamConfig::new("beta"), &second);

    sleep(Duration::from_millis(100)).await;

    assert_eq!(feed_a.status(), ConnectivityStatus::Connected);
    assert_eq!(feed_b.status(), ConnectivityStatus::Disconnected);
    assert_eq!(feed_a.cursor(), Some(Cursor::from("1")));
    assert!(feed_b.cursor().is_none());
    assert_eq!(first.requests()[0].url.path(), "/alpha/_changes");
    assert_eq!(second.requests()[0].url.path(), "/beta/_changes");
}

#[tokio::test(start_paused = true)]
async fn test_observers_attached_before_start_see_everything() {
    let transport = Arc::new(
        ScriptedTransport::new().then(ScriptedConnection::chunks_then_silence(["{\"seq\":1}\n"])),
    );
    let mut feed =
        ChangesFeed::with_transport(StreamConfig::new("db"), transport.clone()).unwrap();
    let mut status = feed.subscribe_to(EventKind::Status);
    let mut watch = feed.watch_status();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.attempts(), 0);

    feed.start().unwrap();
    watch.changed().await.unwrap();

    assert_eq!(*watch.borrow(), ConnectivityStatus::Connected);
    assert_eq!(status.recv().await, Some(connected()));
}
