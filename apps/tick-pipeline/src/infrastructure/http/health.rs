//! Health and Metrics Endpoints
//!
//! - `GET /health` - JSON status: version, uptime, feed and pipeline state
//! - `GET /healthz` - Liveness check (simple OK)
//! - `GET /readyz` - Readiness check (store reachable, feed connected or disabled)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::application::ports::TradeStore;
use crate::application::services::ExecutionStrategy;
use crate::infrastructure::finnhub::{ConnectionState, FeedState};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::queue::InMemoryQueue;

// =============================================================================
// Pipeline Status
// =============================================================================

/// Live process status shared with the health endpoints.
pub struct PipelineStatus {
    version: String,
    started_at: Instant,
    strategy: ExecutionStrategy,
    partitions: u32,
    feed: Arc<FeedState>,
    queue: Arc<InMemoryQueue>,
    workers_running: AtomicUsize,
}

impl PipelineStatus {
    /// Create status for a pipeline about to start its workers.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        strategy: ExecutionStrategy,
        feed: Arc<FeedState>,
        queue: Arc<InMemoryQueue>,
    ) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            strategy,
            partitions: queue.partition_count(),
            feed,
            queue,
            workers_running: AtomicUsize::new(0),
        }
    }

    /// Record a worker starting.
    pub fn worker_started(&self) {
        self.workers_running.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a worker exiting.
    pub fn worker_stopped(&self) {
        self.workers_running.fetch_sub(1, Ordering::Relaxed);
    }

    /// Workers currently consuming.
    #[must_use]
    pub fn workers_running(&self) -> usize {
        self.workers_running.load(Ordering::Relaxed)
    }

    fn health(&self) -> HealthResponse {
        let feed = FeedInfo {
            state: self.feed.state(),
            messages_published: self.feed.messages_published(),
            reconnect_attempts: self.feed.reconnect_attempts(),
            last_connected_at: self.feed.last_connected_at(),
            error: self.feed.error_message(),
        };
        let pipeline = PipelineInfo {
            strategy: self.strategy.as_str(),
            partitions: self.partitions,
            workers_running: self.workers_running(),
            queue_published: self.queue.published(),
            queue_pending: self.queue.pending(),
        };
        let status = determine_health_status(&feed, &pipeline);

        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            feed,
            pipeline,
        }
    }
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed status.
    pub feed: FeedInfo,
    /// Consumer status.
    pub pipeline: PipelineInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Consuming, but the feed is down.
    Degraded,
    /// No workers consuming.
    Unhealthy,
}

/// Feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Frames published to the queue.
    pub messages_published: u64,
    /// Reconnect attempts since the last connect.
    pub reconnect_attempts: u32,
    /// Time of the last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error, if any.
    pub error: Option<String>,
}

/// Consumer status.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    /// Write strategy.
    pub strategy: &'static str,
    /// Configured partitions.
    pub partitions: u32,
    /// Workers currently consuming.
    pub workers_running: usize,
    /// Messages accepted by the queue.
    pub queue_published: u64,
    /// Messages not yet acknowledged.
    pub queue_pending: usize,
}

fn determine_health_status(feed: &FeedInfo, pipeline: &PipelineInfo) -> HealthStatus {
    let all_workers = usize::try_from(pipeline.partitions).unwrap_or(usize::MAX);
    let feed_ok = matches!(
        feed.state,
        ConnectionState::Connected | ConnectionState::Disabled
    );

    if pipeline.workers_running == 0 {
        HealthStatus::Unhealthy
    } else if pipeline.workers_running < all_workers || !feed_ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

pub(super) async fn health_handler<S>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse
where
    S: TradeStore + 'static,
{
    let response = state.status.health();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler<S>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse
where
    S: TradeStore + 'static,
{
    let feed_ready = matches!(
        state.status.feed.state(),
        ConnectionState::Connected | ConnectionState::Disabled
    );
    let store_ready = state.query.list_summaries().await.is_ok();

    if feed_ready && store_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Tests
// =============================================================================
