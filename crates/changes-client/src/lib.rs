//! Change-feed client library
//!
//! Follows a CouchDB-style continuous `_changes` feed over a long-lived
//! HTTP(S) response, reconnecting on errors, clean closes and silent
//! connections, and re-emits every change to local observers while tracking
//! a resumable cursor.
//!
//! # Example
//!
//! ```rust,no_run
//! use changes_client::{ChangesFeed, FeedEvent, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StreamConfig::new("orders")
//!         .with_host("couch.internal")
//!         .with_credentials("reader", "secret")
//!         .with_auto_connect(false);
//!
//!     let mut feed = ChangesFeed::spawn(config)?;
//!     let mut events = feed.subscribe();
//!     feed.start()?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             FeedEvent::Data(change) => println!("{:?} changed", change.id),
//!             FeedEvent::Status(status) => println!("feed {}", status),
//!             FeedEvent::Error(e) => eprintln!("feed error: {}", e),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Resuming
//!
//! [`ChangesFeed::cursor`] returns the last accepted sequence. Persist it and
//! pass it back through [`StreamConfig::with_since`] to continue where the
//! previous process stopped. Delivery is at-least-once.
//!
//! # Testing
//!
//! The `testing` module provides a scripted transport and an HTTP test server:
//!
//! ```rust,ignore
//! use changes_client::testing::{ScriptedConnection, ScriptedTransport};
//!
//! let transport = Arc::new(
//!     ScriptedTransport::new().then(ScriptedConnection::chunks(["{\"seq\":1}\n"])),
//! );
//! let mut feed = ChangesFeed::with_transport(StreamConfig::new("db"), transport)?;
//! ```

pub mod config;
mod connection;
mod error;
mod events;
mod feed;
mod heartbeat;
mod status;
pub mod streaming;
pub mod testing;
pub mod transport;

pub use config::{ChangesStyle, Credentials, Protocol, StreamConfig, Tuning};
pub use error::{ChangesError, ConfigError, FeedError, Result};
pub use events::{EventKind, EventSubscription, FeedEvent};
pub use feed::ChangesFeed;
pub use status::ConnectivityStatus;
pub use streaming::{ChangeRecord, Cursor, Revision};
pub use transport::{FeedRequest, HttpTransport, Transport};
