//! reqwest-backed transport

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::{debug, instrument};

use super::{ChunkStream, FeedRequest, Transport};
use crate::error::FeedError;

/// HTTP(S) transport; the URL scheme picks plain TCP or TLS
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the given connect timeout
    ///
    /// No overall request timeout is set: a continuous feed is expected to
    /// stay open indefinitely, and silence is handled by the heartbeat
    /// monitor instead.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self { client })
    }

    /// Reuse an existing client (custom TLS roots, proxies, default headers)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn open(&self, request: &FeedRequest) -> Result<ChunkStream, FeedError> {
        debug!("Opening change feed request");

        let mut builder = self
            .client
            .get(request.url.clone())
            .header(ACCEPT, "application/json");

        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(FeedError::server(status, message.trim()));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FeedError::from));

        Ok(Box::pin(chunks))
    }
}
