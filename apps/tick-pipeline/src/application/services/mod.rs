//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `normalizer`: Raw feed envelope to validated trades
//! - `BatchWriter`: Idempotent trade persistence
//! - `AggregateUpdater`: Commutative per-symbol summary upserts
//! - `PipelineCoordinator`: Per-message state machine and ack decision
//! - `PipelineWorker`: Single-partition consume loop
//! - `TradeQueryService`: Keyset-paginated reads
//! - `BackoffPolicy`: Exponential backoff with jitter

use std::future::Future;
use std::time::Duration;

use crate::application::ports::StoreError;

/// Exponential backoff with jitter.
pub mod backoff;

/// Idempotent batch persistence.
pub mod batch_writer;

/// Per-symbol summary updates.
pub mod aggregate_updater;

/// Per-message pipeline state machine.
pub mod coordinator;

/// Envelope parsing and idempotency key derivation.
pub mod normalizer;

/// Keyset pagination read path.
pub mod query;

/// Single-partition consume loop.
pub mod worker;

pub use aggregate_updater::{AggregateFailure, AggregateUpdater, PartialFailure};
pub use backoff::{BackoffConfig, BackoffPolicy};
pub use batch_writer::{BatchWriter, WriteError};
pub use coordinator::{Disposition, ExecutionStrategy, PipelineCoordinator, ProcessReport, Stage};
pub use normalizer::{NormalizeError, NormalizeOutcome, normalize};
pub use query::{QueryError, TradeQueryService};
pub use worker::{PipelineWorker, WorkerError, WorkerStats};

/// Run a store call under a deadline; expiry becomes `StoreError::Timeout`.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| {
            Err(StoreError::Timeout {
                operation,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        })
}
