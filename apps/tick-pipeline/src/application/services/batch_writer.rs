//! Idempotent Batch Writer
//!
//! Persists the trades of one message in a single all-or-nothing store call
//! and classifies the outcome. A duplicate idempotency key means an earlier
//! attempt already landed this batch; every other failure means nothing
//! landed and the caller must not touch aggregates.

use std::sync::Arc;
use std::time::Duration;

use super::with_deadline;
use crate::application::ports::{StoreError, TradeStore};
use crate::domain::trade::{DeltaMap, NormalizedTrade};

/// Batch write failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The batch collided with previously persisted keys. Benign.
    #[error("batch already persisted (duplicate key {key})")]
    DuplicateKeyConflict {
        /// First colliding key reported by the store.
        key: String,
    },

    /// The batch was not persisted.
    #[error("persistence failed: {0}")]
    Persistence(#[source] StoreError),
}

impl WriteError {
    /// Whether the error is the benign duplicate case.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKeyConflict { .. })
    }
}

impl From<StoreError> for WriteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { key } => Self::DuplicateKeyConflict { key },
            other => Self::Persistence(other),
        }
    }
}

/// Writes trade batches against a store that enforces key uniqueness.
pub struct BatchWriter<S>
where
    S: TradeStore,
{
    store: Arc<S>,
    timeout: Duration,
}

impl<S> BatchWriter<S>
where
    S: TradeStore,
{
    /// Create a writer whose store calls expire after `timeout`.
    #[must_use]
    pub const fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Insert all trades or none.
    ///
    /// An empty batch performs no store call and returns 0.
    pub async fn write_batch(&self, trades: &[NormalizedTrade]) -> Result<usize, WriteError> {
        if trades.is_empty() {
            return Ok(0);
        }

        let inserted = with_deadline(
            "insert_trades",
            self.timeout,
            self.store.insert_trades(trades),
        )
        .await?;

        tracing::debug!(inserted, "Trade batch persisted");
        Ok(inserted)
    }

    /// Insert trades and apply their aggregate deltas in one unit.
    ///
    /// Classification matches `write_batch`: a duplicate key means the unit
    /// rolled back because an earlier attempt already committed it.
    pub async fn write_with_aggregates(
        &self,
        trades: &[NormalizedTrade],
        deltas: &DeltaMap,
    ) -> Result<usize, WriteError> {
        if trades.is_empty() {
            return Ok(0);
        }

        let inserted = with_deadline(
            "write_atomic",
            self.timeout,
            self.store.write_atomic(trades, deltas),
        )
        .await?;

        tracing::debug!(inserted, symbols = deltas.len(), "Trade batch committed atomically");
        Ok(inserted)
    }
}
