//! Trade Store Port (Driven Port)
//!
//! Interface for the durable store holding trade records and per-symbol
//! summaries. Adapters must enforce uniqueness of the idempotency key and
//! apply summary updates store-side (increment and max), so that concurrent
//! writers never need external locking.

use async_trait::async_trait;

use crate::domain::pagination::PaginationCursor;
use crate::domain::trade::{DeltaMap, NormalizedTrade, SymbolDelta, SymbolSummary};

/// Trade store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// An insert collided with an existing idempotency key.
    #[error("duplicate idempotency key: {key}")]
    DuplicateKey {
        /// The colliding key.
        key: String,
    },

    /// A constraint unrelated to idempotency rejected the write.
    #[error("constraint violation: {message}")]
    Constraint {
        /// Store-provided detail.
        message: String,
    },

    /// The store could not be reached or is busy.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Store-provided detail.
        message: String,
    },

    /// The operation did not complete within its deadline.
    #[error("store operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Deadline that expired.
        timeout_ms: u64,
    },

    /// The query failed or returned unreadable data.
    #[error("store query failed: {message}")]
    Query {
        /// Store-provided detail.
        message: String,
    },
}

impl StoreError {
    /// Whether the error is a benign idempotency-key collision.
    #[must_use]
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

/// Port for the durable trade store.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Insert all trades or none of them.
    ///
    /// Returns the number of trades inserted.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if any idempotency key already
    /// exists; nothing from the call is then visible.
    async fn insert_trades(&self, trades: &[NormalizedTrade]) -> Result<usize, StoreError>;

    /// Upsert one symbol's summary: add `delta.count` to the trade count,
    /// raise the last trade time to `delta.max_event_time` if later, and
    /// set the symbol only when the summary is created.
    async fn upsert_summary(&self, symbol: &str, delta: &SymbolDelta) -> Result<(), StoreError>;

    /// Insert trades and apply every delta in a single all-or-nothing unit.
    ///
    /// # Errors
    ///
    /// Any error means nothing from the call was committed.
    async fn write_atomic(
        &self,
        trades: &[NormalizedTrade],
        deltas: &DeltaMap,
    ) -> Result<usize, StoreError>;

    /// All symbol summaries, ordered by symbol ascending.
    async fn list_summaries(&self) -> Result<Vec<SymbolSummary>, StoreError>;

    /// Up to `limit` trades for `symbol` strictly older than `before`
    /// (or the newest trades when `before` is `None`), ordered by event
    /// time descending, ties broken by idempotency key descending.
    async fn find_trades(
        &self,
        symbol: &str,
        before: Option<PaginationCursor>,
        limit: usize,
    ) -> Result<Vec<NormalizedTrade>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_classification() {
        let dup = StoreError::DuplicateKey {
            key: "t-0-1-AAPL-1-0".to_string(),
        };
        assert!(dup.is_duplicate_key());
        assert!(dup.to_string().contains("t-0-1-AAPL-1-0"));

        let other = StoreError::Constraint {
            message: "NOT NULL constraint failed: trades.price".to_string(),
        };
        assert!(!other.is_duplicate_key());
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = StoreError::Timeout {
            operation: "insert_trades",
            timeout_ms: 10_000,
        };
        assert_eq!(
            err.to_string(),
            "store operation 'insert_trades' timed out after 10000ms"
        );
    }
}
