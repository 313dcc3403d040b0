#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Tick Pipeline - Idempotent Trade Ingestion
//!
//! Consumes market trade ticks from a WebSocket feed through a partitioned
//! queue, persists every tick exactly once behind an idempotency key,
//! maintains per-symbol summaries, and serves keyset-paginated reads.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Trade value types with no I/O
//!   - `message`: Raw queue messages and delivery metadata
//!   - `trade`: Normalized trades, idempotency keys, summaries
//!   - `pagination`: Cursors and pages
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `TradeStore`, `MessageSource`, `MessageSink`
//!   - `services`: Normalization, persistence, coordination, queries
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `finnhub`: WebSocket feed ingestor
//!   - `queue`: Partitioned at-least-once queue
//!   - `persistence`: SQLite and in-memory trade stores
//!   - `http`: Read API and health endpoints
//!   - `config`, `metrics`, `telemetry`: Ambient concerns
//!
//! # Data Flow
//!
//! ```text
//! Finnhub WS -> FinnhubClient -> InMemoryQueue (N partitions)
//!                                     |
//!                     PipelineWorker per partition
//!                                     |
//!          normalize -> BatchWriter -> AggregateUpdater -> ack / redeliver
//!                                     |
//!                               TradeStore <- TradeQueryService <- HTTP API
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core trade types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::message::RawMessage;
pub use domain::pagination::{PageRequest, PaginationCursor, TradePage};
pub use domain::trade::{IdempotencyKey, NormalizedTrade, SymbolSummary};

// Ports
pub use application::ports::{MessageSink, MessageSource, QueueError, StoreError, TradeStore};

// Services
pub use application::services::{
    BackoffConfig, Disposition, ExecutionStrategy, PipelineCoordinator, PipelineWorker,
    ProcessReport, QueryError, TradeQueryService, WorkerError, WorkerStats,
};

// Infrastructure config
pub use infrastructure::config::{
    ApiSettings, ConfigError, FeedSettings, FinnhubCredentials, PipelineConfig,
    PipelineSettings, StoreBackend, StoreSettings,
};

// Adapters
pub use infrastructure::finnhub::{FeedEvent, FeedState, FinnhubClient, FinnhubClientConfig};
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, PipelineStatus};
pub use infrastructure::persistence::{InMemoryTradeStore, SqliteTradeStore};
pub use infrastructure::queue::{InMemoryQueue, PartitionConsumer};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
