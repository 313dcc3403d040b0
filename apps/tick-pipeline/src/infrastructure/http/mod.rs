//! HTTP Server
//!
//! One listener serves the read API and the operational endpoints.
//!
//! | Route                      | Purpose                           |
//! |----------------------------|-----------------------------------|
//! | `GET /api/v1/symbols`      | Tracked symbols with summaries    |
//! | `GET /api/v1/trades/{sym}` | Keyset-paginated trades           |
//! | `GET /health`              | JSON status                       |
//! | `GET /healthz`             | Liveness                          |
//! | `GET /readyz`              | Readiness                         |
//! | `GET /metrics`             | Prometheus exposition             |

mod api;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::TradeStore;
use crate::application::services::TradeQueryService;

pub use api::{ApiError, ApiResponse, SymbolsData, TradeDto, TradesData};
pub use health::{FeedInfo, HealthResponse, HealthStatus, PipelineInfo, PipelineStatus};

// =============================================================================
// Server State
// =============================================================================

/// State shared by every handler.
pub struct AppState<S: TradeStore> {
    query: TradeQueryService<S>,
    request_timeout: Duration,
    status: Arc<PipelineStatus>,
}

impl<S: TradeStore> AppState<S> {
    /// Create handler state.
    #[must_use]
    pub const fn new(
        query: TradeQueryService<S>,
        request_timeout: Duration,
        status: Arc<PipelineStatus>,
    ) -> Self {
        Self {
            query,
            request_timeout,
            status,
        }
    }
}

/// Build the router for `state`.
pub fn router<S>(state: Arc<AppState<S>>) -> Router
where
    S: TradeStore + 'static,
{
    Router::new()
        .route("/api/v1/symbols", get(api::list_symbols::<S>))
        .route("/api/v1/trades", get(api::missing_symbol))
        .route("/api/v1/trades/", get(api::missing_symbol))
        .route("/api/v1/trades/{symbol}", get(api::list_trades::<S>))
        .route("/health", get(health::health_handler::<S>))
        .route("/healthz", get(health::liveness_handler))
        .route("/readyz", get(health::readiness_handler::<S>))
        .route("/metrics", get(health::metrics_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server error.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// HTTP server for the read API and health endpoints.
pub struct HttpServer<S: TradeStore> {
    port: u16,
    state: Arc<AppState<S>>,
    cancel: CancellationToken,
}

impl<S> HttpServer<S>
where
    S: TradeStore + 'static,
{
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState<S>>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters a
    /// fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
