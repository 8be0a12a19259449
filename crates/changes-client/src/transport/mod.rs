//! Transport layer for the change feed
//!
//! The connection task only needs three things from a transport: open a
//! streaming request, receive its chunks/end/error, and abort it. Aborting is
//! dropping the [`ChunkStream`].
//!
//! - [`HttpTransport`]: reqwest over HTTP or HTTPS
//! - [`mock::ScriptedTransport`]: scripted connections for tests

mod http;
pub mod mock;
mod request;

pub use http::HttpTransport;
pub use request::FeedRequest;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::FeedError;

/// Body chunks of an open feed; ends when the server closes the response
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, FeedError>> + Send>>;

/// Transport-agnostic way of opening one feed request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the request and return its body once the server accepted it
    ///
    /// A non-success response must be returned as an error rather than as a
    /// stream.
    async fn open(&self, request: &FeedRequest) -> Result<ChunkStream, FeedError>;
}
