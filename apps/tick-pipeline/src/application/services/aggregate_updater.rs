//! Aggregate Updater
//!
//! Applies per-symbol summary deltas one symbol at a time. Increment and
//! max are commutative, so a re-applied delta never reorders history; at
//! worst it over-counts. Every symbol is attempted regardless of earlier
//! failures, and failures never block acknowledgment of the message.

use std::sync::Arc;
use std::time::Duration;

use super::with_deadline;
use crate::application::ports::{StoreError, TradeStore};
use crate::domain::trade::DeltaMap;

/// One symbol whose summary could not be updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateFailure {
    /// Symbol whose upsert failed.
    pub symbol: String,
    /// Store error for that upsert.
    pub error: StoreError,
}

/// Some symbol summaries failed to update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} symbol summaries failed to update ({applied} applied)", .failures.len())]
pub struct PartialFailure {
    /// Symbols updated successfully.
    pub applied: usize,
    /// Symbols that failed, in ascending symbol order.
    pub failures: Vec<AggregateFailure>,
}

/// Applies commutative per-symbol upserts.
pub struct AggregateUpdater<S>
where
    S: TradeStore,
{
    store: Arc<S>,
    timeout: Duration,
}

impl<S> AggregateUpdater<S>
where
    S: TradeStore,
{
    /// Create an updater whose per-symbol store calls expire after `timeout`.
    #[must_use]
    pub const fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Apply every delta, in ascending symbol order.
    ///
    /// Returns the number of symbols updated.
    pub async fn apply_deltas(&self, deltas: &DeltaMap) -> Result<usize, PartialFailure> {
        let mut applied = 0;
        let mut failures = Vec::new();

        for (symbol, delta) in deltas {
            let result = with_deadline(
                "upsert_summary",
                self.timeout,
                self.store.upsert_summary(symbol, delta),
            )
            .await;

            match result {
                Ok(()) => applied += 1,
                Err(error) => {
                    tracing::warn!(
                        symbol = %symbol,
                        count = delta.count,
                        error = %error,
                        "Symbol summary update failed (non-critical)"
                    );
                    failures.push(AggregateFailure {
                        symbol: symbol.clone(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(applied)
        } else {
            Err(PartialFailure { applied, failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::DateTime;
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::pagination::PaginationCursor;
    use crate::domain::trade::{NormalizedTrade, SymbolDelta, SymbolSummary};

    /// Store double that fails upserts for selected symbols.
    #[derive(Default)]
    struct FlakySummaryStore {
        failing: HashSet<String>,
        attempted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TradeStore for FlakySummaryStore {
        async fn insert_trades(&self, trades: &[NormalizedTrade]) -> Result<usize, StoreError> {
            Ok(trades.len())
        }

        async fn upsert_summary(&self, symbol: &str, _: &SymbolDelta) -> Result<(), StoreError> {
            self.attempted.lock().push(symbol.to_string());
            if self.failing.contains(symbol) {
                Err(StoreError::Unavailable {
                    message: "connection reset".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn write_atomic(
            &self,
            trades: &[NormalizedTrade],
            _: &DeltaMap,
        ) -> Result<usize, StoreError> {
            Ok(trades.len())
        }

        async fn list_summaries(&self) -> Result<Vec<SymbolSummary>, StoreError> {
            Ok(Vec::new())
        }

        async fn find_trades(
            &self,
            _: &str,
            _: Option<PaginationCursor>,
            _: usize,
        ) -> Result<Vec<NormalizedTrade>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn deltas(symbols: &[&str]) -> DeltaMap {
        symbols
            .iter()
            .map(|s| {
                (
                    (*s).to_string(),
                    SymbolDelta::single(DateTime::from_timestamp_millis(1000).unwrap()),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn applies_every_symbol_in_order() {
        let store = Arc::new(FlakySummaryStore::default());
        let updater = AggregateUpdater::new(Arc::clone(&store), Duration::from_secs(1));

        let applied = updater.apply_deltas(&deltas(&["MSFT", "AAPL", "GOOG"])).await;
        assert_eq!(applied, Ok(3));
        assert_eq!(*store.attempted.lock(), vec!["AAPL", "GOOG", "MSFT"]);
    }

    #[tokio::test]
    async fn failure_does_not_stop_remaining_symbols() {
        let store = Arc::new(FlakySummaryStore {
            failing: HashSet::from(["GOOG".to_string()]),
            ..FlakySummaryStore::default()
        });
        let updater = AggregateUpdater::new(Arc::clone(&store), Duration::from_secs(1));

        let err = updater
            .apply_deltas(&deltas(&["AAPL", "GOOG", "MSFT"]))
            .await
            .unwrap_err();

        assert_eq!(err.applied, 2);
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].symbol, "GOOG");
        assert_eq!(store.attempted.lock().len(), 3);
        assert_eq!(err.to_string(), "1 symbol summaries failed to update (2 applied)");
    }

    #[tokio::test]
    async fn empty_deltas_apply_nothing() {
        let store = Arc::new(FlakySummaryStore::default());
        let updater = AggregateUpdater::new(store, Duration::from_secs(1));
        assert_eq!(updater.apply_deltas(&DeltaMap::new()).await, Ok(0));
    }
}
