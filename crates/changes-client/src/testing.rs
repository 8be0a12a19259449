//! Test utilities for changes-client
//!
//! Provides a scripted transport for driving the connection task without a
//! network, and a throwaway HTTP server for end-to-end tests.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::config::StreamConfig;

pub use crate::transport::mock::{ScriptedConnection, ScriptedTransport};

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve an axum Router on an ephemeral local port
    ///
    /// # Example
    ///
    /// ```ignore
    /// use axum::{routing::get, Router};
    /// use changes_client::testing::{chunked_body, TestServer};
    ///
    /// let router = Router::new().route(
    ///     "/{db}/_changes",
    ///     get(|| async { chunked_body(vec!["{\"seq\":1}\n".into()], Duration::ZERO, false) }),
    /// );
    /// let server = TestServer::start(router).await?;
    /// let feed = ChangesFeed::spawn(server.config("db"))?;
    /// ```
    pub async fn start<S>(router: axum::Router<S>) -> std::io::Result<Self>
    where
        S: Clone + Send + Sync + 'static,
        axum::Router<S>: Into<axum::Router>,
    {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let router: axum::Router = router.into();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Feed configuration pointing at this server
    pub fn config(&self, database: &str) -> StreamConfig {
        StreamConfig::new(database)
            .with_host(self.addr.ip().to_string())
            .with_port(self.addr.port())
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Response body written in separate chunks
///
/// Each chunk is followed by `pause`. With `keep_open` the body never ends
/// after the last chunk, like a continuous feed with nothing more to say.
pub fn chunked_body(chunks: Vec<String>, pause: Duration, keep_open: bool) -> Body {
    let stream = async_stream::stream! {
        for chunk in chunks {
            yield Ok::<_, std::io::Error>(Bytes::from(chunk));
            tokio::time::sleep(pause).await;
        }
        if keep_open {
            futures::future::pending::<()>().await;
        }
    };

    Body::from_stream(stream)
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
