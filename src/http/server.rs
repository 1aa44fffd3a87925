//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{router, AppState};
use crate::config::LimitsConfig;
use crate::error::{Result, TollgateError};
use crate::ratelimit::RateLimiterBackend;

/// HTTP server that puts every request behind the rate limiter.
pub struct HttpServer<R: RateLimiterBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    state: AppState<R>,
}

impl<R: RateLimiterBackend + 'static> HttpServer<R> {
    pub fn new(addr: SocketAddr, limiter: Arc<R>, limits: LimitsConfig) -> Self {
        Self {
            addr,
            state: AppState::new(limiter, limits),
        }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server"
        );

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TollgateError::Io(e)
            })
    }
}
