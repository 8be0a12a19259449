//! Scripted transport for testing

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ChunkStream, FeedRequest, Transport};
use crate::error::FeedError;

/// Behaviour of one scripted connection attempt
pub enum ScriptedConnection {
    /// Open succeeds and the body yields `items`, then ends or goes silent
    Stream {
        items: Vec<Result<Bytes, FeedError>>,
        hang: bool,
    },
    /// Open fails with the error
    Refuse(FeedError),
    /// Open never completes
    Stall,
    /// Open succeeds and the body is fed from a channel; dropping the sender
    /// ends the body cleanly
    Channel(mpsc::UnboundedReceiver<Result<Bytes, FeedError>>),
}

impl ScriptedConnection {
    /// Body made of text chunks that ends after the last one
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream {
            items: chunks
                .into_iter()
                .map(|c| {
                    let text: String = c.into();
                    Ok(Bytes::from(text))
                })
                .collect(),
            hang: false,
        }
    }

    /// Body made of text chunks that stays open and silent afterwards
    pub fn chunks_then_silence<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Self::chunks(chunks) {
            Self::Stream { items, .. } => Self::Stream { items, hang: true },
            other => other,
        }
    }

    /// Body that yields the chunks and then breaks with `error`
    pub fn chunks_then_error<I, S>(chunks: I, error: FeedError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Self::chunks(chunks) {
            Self::Stream { mut items, .. } => {
                items.push(Err(error));
                Self::Stream { items, hang: true }
            }
            other => other,
        }
    }
}

/// Transport that plays back scripted connections in order
///
/// Every `open` is recorded. Once the script runs out, further attempts
/// stall forever.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedConnection>>,
    requests: Mutex<Vec<FeedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection to the script (builder style)
    pub fn then(self, connection: ScriptedConnection) -> Self {
        self.push(connection);
        self
    }

    /// Append a connection to the script
    pub fn push(&self, connection: ScriptedConnection) {
        self.script.lock().push_back(connection);
    }

    /// Append a channel-fed connection and return its sending side
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<Bytes, FeedError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(ScriptedConnection::Channel(rx));
        tx
    }

    /// Number of `open` calls so far
    pub fn attempts(&self) -> usize {
        self.requests.lock().len()
    }

    /// All requests seen so far
    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<FeedRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &FeedRequest) -> Result<ChunkStream, FeedError> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();

        match next.unwrap_or(ScriptedConnection::Stall) {
            ScriptedConnection::Stream { items, hang } => {
                let body = futures::stream::iter(items);
                if hang {
                    Ok(Box::pin(body.chain(futures::stream::pending())))
                } else {
                    Ok(Box::pin(body))
                }
            }
            ScriptedConnection::Refuse(error) => Err(error),
            ScriptedConnection::Stall => futures::future::pending().await,
            ScriptedConnection::Channel(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
        }
    }
}
