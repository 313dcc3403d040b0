//! Pipeline Coordinator
//!
//! Drives one inbound message through normalize, write and aggregate, then
//! decides whether the message is acknowledged or handed back for
//! redelivery.
//!
//! ```text
//! Received ──► normalize ──┬─► Skipped ─────────────────────────► Acknowledge
//!                          ├─► ParseFailed ─────────────────────► Acknowledge
//!                          ├─► AllInvalid ──────────────────────► Acknowledge
//!                          └─► Batch ──► write ──┬─► Aggregated ─► Acknowledge
//!                                                └─► WriteFailed ► Retry
//! ```
//!
//! Two strategies share this state machine:
//!
//! - **Independent**: the record write and each summary upsert are separate
//!   store calls. A duplicate-key write still applies aggregates, so a
//!   redelivered message can inflate summaries by its own size once.
//! - **Atomic**: records and summaries commit together. A duplicate-key
//!   write rolls the whole unit back, leaving summaries untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::aggregate_updater::{AggregateFailure, AggregateUpdater};
use super::batch_writer::{BatchWriter, WriteError};
use super::normalizer::{NormalizeError, NormalizeOutcome, normalize};
use crate::application::ports::TradeStore;
use crate::domain::message::RawMessage;
use crate::domain::trade::TradeBatch;
use crate::infrastructure::metrics;

// =============================================================================
// Strategy and Outcome Types
// =============================================================================

/// How the record write and aggregate updates are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Separate store calls; favors availability.
    #[default]
    Independent,
    /// One all-or-nothing store unit; favors consistency.
    Atomic,
}

impl ExecutionStrategy {
    /// Parse a strategy name, or `None` when it names no strategy.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "atomic" | "transactional" => Some(Self::Atomic),
            "independent" => Some(Self::Independent),
            _ => None,
        }
    }

    /// Parse a strategy name; unknown values fall back to `Independent`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Strategy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Atomic => "atomic",
        }
    }
}

/// Final stage a message reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Not a trade message, or a trade message without ticks.
    Skipped,
    /// The envelope was malformed.
    ParseFailed,
    /// Every tick was invalid.
    AllInvalid,
    /// Records were not persisted.
    WriteFailed,
    /// Records are durable and the aggregate step ran to completion.
    Aggregated,
}

impl Stage {
    /// Stage name for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::ParseFailed => "parse_failed",
            Self::AllInvalid => "all_invalid",
            Self::WriteFailed => "write_failed",
            Self::Aggregated => "aggregated",
        }
    }
}

/// What the consumer should do with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Commit the message.
    Acknowledge,
    /// Leave it uncommitted and redeliver it.
    Retry,
}

impl Disposition {
    /// Disposition name for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acknowledge => "acknowledge",
            Self::Retry => "retry",
        }
    }
}

/// Observable outcome of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Final stage reached.
    pub stage: Stage,
    /// Ack decision.
    pub disposition: Disposition,
    /// Records newly inserted by this attempt.
    pub inserted: usize,
    /// Whether the write hit an already-persisted key.
    pub duplicate: bool,
    /// Ticks dropped during normalization.
    pub dropped_ticks: usize,
    /// Summary upserts that failed (independent strategy only).
    pub aggregate_failures: Vec<AggregateFailure>,
    /// Error that determined the stage, if any.
    pub error: Option<String>,
}

impl ProcessReport {
    const fn new(stage: Stage, disposition: Disposition) -> Self {
        Self {
            stage,
            disposition,
            inserted: 0,
            duplicate: false,
            dropped_ticks: 0,
            aggregate_failures: Vec::new(),
            error: None,
        }
    }

    /// Whether the message should be acknowledged.
    #[must_use]
    pub fn should_acknowledge(&self) -> bool {
        self.disposition == Disposition::Acknowledge
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Per-message pipeline driver.
pub struct PipelineCoordinator<S>
where
    S: TradeStore,
{
    writer: BatchWriter<S>,
    updater: AggregateUpdater<S>,
    strategy: ExecutionStrategy,
}

impl<S> PipelineCoordinator<S>
where
    S: TradeStore,
{
    /// Create a coordinator over `store`; each store call expires after
    /// `store_timeout`.
    #[must_use]
    pub fn new(store: Arc<S>, strategy: ExecutionStrategy, store_timeout: Duration) -> Self {
        Self {
            writer: BatchWriter::new(Arc::clone(&store), store_timeout),
            updater: AggregateUpdater::new(store, store_timeout),
            strategy,
        }
    }

    /// Strategy in use.
    #[must_use]
    pub const fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Process one message and decide its disposition.
    pub async fn process(&self, raw: &RawMessage) -> ProcessReport {
        let started = Instant::now();

        let report = match normalize(raw) {
            Ok(NormalizeOutcome::Skip { message_type }) => {
                tracing::debug!(
                    offset = raw.offset(),
                    message_type = %message_type,
                    "Skipping non-trade message"
                );
                ProcessReport::new(Stage::Skipped, Disposition::Acknowledge)
            }
            Err(NormalizeError::Parse(reason)) => {
                tracing::error!(
                    partition = raw.partition(),
                    offset = raw.offset(),
                    reason = %reason,
                    "Discarding malformed message"
                );
                ProcessReport {
                    error: Some(reason),
                    ..ProcessReport::new(Stage::ParseFailed, Disposition::Acknowledge)
                }
            }
            Err(NormalizeError::AllTicksInvalid { dropped }) => {
                tracing::error!(
                    partition = raw.partition(),
                    offset = raw.offset(),
                    dropped = dropped.len(),
                    "Discarding message: trade data present but every tick was invalid"
                );
                metrics::record_ticks_dropped(dropped.len());
                ProcessReport {
                    dropped_ticks: dropped.len(),
                    error: Some(format!("all {} ticks were invalid", dropped.len())),
                    ..ProcessReport::new(Stage::AllInvalid, Disposition::Acknowledge)
                }
            }
            Ok(NormalizeOutcome::Batch(batch)) => {
                metrics::record_ticks_dropped(batch.dropped.len());
                match self.strategy {
                    ExecutionStrategy::Independent => self.write_independent(raw, batch).await,
                    ExecutionStrategy::Atomic => self.write_atomic(raw, batch).await,
                }
            }
        };

        metrics::record_message_processed(report.stage.as_str(), report.disposition.as_str());
        metrics::record_processing_duration(self.strategy.as_str(), started.elapsed());
        report
    }

    async fn write_independent(&self, raw: &RawMessage, batch: TradeBatch) -> ProcessReport {
        let dropped_ticks = batch.dropped.len();

        let (inserted, duplicate) = match self.writer.write_batch(&batch.trades).await {
            Ok(inserted) => {
                metrics::record_trades_inserted(inserted);
                (inserted, false)
            }
            Err(WriteError::DuplicateKeyConflict { key }) => {
                metrics::record_duplicate_batch();
                tracing::info!(
                    offset = raw.offset(),
                    key = %key,
                    "Batch already persisted; applying aggregates"
                );
                (0, true)
            }
            Err(err @ WriteError::Persistence(_)) => {
                return Self::write_failed(raw, dropped_ticks, &err);
            }
        };

        let aggregate_failures = match self.updater.apply_deltas(&batch.deltas).await {
            Ok(_) => Vec::new(),
            Err(partial) => {
                metrics::record_aggregate_failures(partial.failures.len());
                tracing::warn!(
                    offset = raw.offset(),
                    error = %partial,
                    "Aggregate step completed with failures"
                );
                partial.failures
            }
        };

        ProcessReport {
            inserted,
            duplicate,
            dropped_ticks,
            aggregate_failures,
            ..ProcessReport::new(Stage::Aggregated, Disposition::Acknowledge)
        }
    }

    async fn write_atomic(&self, raw: &RawMessage, batch: TradeBatch) -> ProcessReport {
        let dropped_ticks = batch.dropped.len();

        match self
            .writer
            .write_with_aggregates(&batch.trades, &batch.deltas)
            .await
        {
            Ok(inserted) => {
                metrics::record_trades_inserted(inserted);
                ProcessReport {
                    inserted,
                    dropped_ticks,
                    ..ProcessReport::new(Stage::Aggregated, Disposition::Acknowledge)
                }
            }
            Err(WriteError::DuplicateKeyConflict { key }) => {
                metrics::record_duplicate_batch();
                tracing::info!(
                    offset = raw.offset(),
                    key = %key,
                    "Batch and aggregates already committed; acknowledging"
                );
                ProcessReport {
                    duplicate: true,
                    dropped_ticks,
                    ..ProcessReport::new(Stage::Aggregated, Disposition::Acknowledge)
                }
            }
            Err(err @ WriteError::Persistence(_)) => Self::write_failed(raw, dropped_ticks, &err),
        }
    }

    fn write_failed(raw: &RawMessage, dropped_ticks: usize, err: &WriteError) -> ProcessReport {
        tracing::error!(
            partition = raw.partition(),
            offset = raw.offset(),
            error = %err,
            "CRITICAL: trade batch not persisted; skipping aggregates, message will be redelivered"
        );
        ProcessReport {
            dropped_ticks,
            error: Some(err.to_string()),
            ..ProcessReport::new(Stage::WriteFailed, Disposition::Retry)
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::StoreError;
    use crate::infrastructure::persistence::InMemoryTradeStore;

    fn message(offset: u64, payload: &str) -> RawMessage {
        RawMessage::new("t", 0, offset, payload.as_bytes().to_vec())
    }

    const TWO_SYMBOLS: &str = r#"{"type":"trade","data":[
        {"s":"AAPL","p":150.75,"v":100.5,"t":1678886400123},
        {"s":"MSFT","p":310.1,"v":2,"t":1678886400456},
        {"s":"AAPL","p":150.8,"v":7,"t":1678886400789}
    ]}"#;

    fn coordinator(
        store: &Arc<InMemoryTradeStore>,
        strategy: ExecutionStrategy,
    ) -> PipelineCoordinator<InMemoryTradeStore> {
        PipelineCoordinator::new(Arc::clone(store), strategy, Duration::from_secs(1))
    }

    async fn count(store: &InMemoryTradeStore, symbol: &str) -> u64 {
        store
            .list_summaries()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.symbol == symbol)
            .map_or(0, |s| s.trade_count)
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            ExecutionStrategy::from_str_case_insensitive("ATOMIC"),
            ExecutionStrategy::Atomic
        );
        assert_eq!(
            ExecutionStrategy::from_str_case_insensitive("independent"),
            ExecutionStrategy::Independent
        );
        assert_eq!(
            ExecutionStrategy::from_str_case_insensitive("bogus"),
            ExecutionStrategy::Independent
        );
        assert_eq!(ExecutionStrategy::parse(" Transactional "), Some(ExecutionStrategy::Atomic));
        assert_eq!(ExecutionStrategy::parse("atomc"), None);
        assert_eq!(ExecutionStrategy::parse(""), None);
    }

    #[tokio::test]
    async fn ping_is_skipped_and_acknowledged() {
        let store = Arc::new(InMemoryTradeStore::new());
        let report = coordinator(&store, ExecutionStrategy::Independent)
            .process(&message(1, r#"{"type":"ping"}"#))
            .await;

        assert_eq!(report.stage, Stage::Skipped);
        assert!(report.should_acknowledge());
        assert_eq!(store.trade_count(), 0);
        assert!(store.list_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_and_all_invalid_are_discarded() {
        let store = Arc::new(InMemoryTradeStore::new());
        let coordinator = coordinator(&store, ExecutionStrategy::Atomic);

        let parse = coordinator.process(&message(1, "{oops")).await;
        assert_eq!(parse.stage, Stage::ParseFailed);
        assert!(parse.should_acknowledge());

        let invalid = coordinator
            .process(&message(2, r#"{"type":"trade","data":[{"s":"A","p":"x","v":1,"t":1}]}"#))
            .await;
        assert_eq!(invalid.stage, Stage::AllInvalid);
        assert_eq!(invalid.dropped_ticks, 1);
        assert!(invalid.should_acknowledge());
        assert_eq!(store.trade_count(), 0);
    }

    #[tokio::test]
    async fn independent_writes_records_then_aggregates() {
        let store = Arc::new(InMemoryTradeStore::new());
        let report = coordinator(&store, ExecutionStrategy::Independent)
            .process(&message(7, TWO_SYMBOLS))
            .await;

        assert_eq!(report.stage, Stage::Aggregated);
        assert_eq!(report.inserted, 3);
        assert!(!report.duplicate);
        assert_eq!(count(&store, "AAPL").await, 2);
        assert_eq!(count(&store, "MSFT").await, 1);
    }

    #[tokio::test]
    async fn independent_redelivery_reapplies_aggregates_once() {
        let store = Arc::new(InMemoryTradeStore::new());
        let coordinator = coordinator(&store, ExecutionStrategy::Independent);
        let msg = message(7, TWO_SYMBOLS);

        coordinator.process(&msg).await;
        let redelivered = coordinator.process(&msg).await;

        assert!(redelivered.duplicate);
        assert!(redelivered.should_acknowledge());
        assert_eq!(redelivered.inserted, 0);
        assert_eq!(store.trade_count(), 3);
        assert_eq!(count(&store, "AAPL").await, 4);
        assert_eq!(count(&store, "MSFT").await, 2);
    }

    #[tokio::test]
    async fn atomic_redelivery_leaves_summaries_unchanged() {
        let store = Arc::new(InMemoryTradeStore::new());
        let coordinator = coordinator(&store, ExecutionStrategy::Atomic);
        let msg = message(7, TWO_SYMBOLS);

        let first = coordinator.process(&msg).await;
        assert_eq!(first.inserted, 3);

        let redelivered = coordinator.process(&msg).await;
        assert!(redelivered.duplicate);
        assert!(redelivered.should_acknowledge());
        assert_eq!(store.trade_count(), 3);
        assert_eq!(count(&store, "AAPL").await, 2);
        assert_eq!(count(&store, "MSFT").await, 1);
    }

    /// Store whose writes fail until switched healthy; summary upserts are
    /// recorded so tests can assert they were skipped. Upserts for
    /// `failing_symbol` always fail.
    struct OutageStore {
        inner: InMemoryTradeStore,
        down: Mutex<bool>,
        upserts: Mutex<usize>,
        failing_symbol: Option<&'static str>,
    }

    impl OutageStore {
        fn down() -> Self {
            Self {
                inner: InMemoryTradeStore::new(),
                down: Mutex::new(true),
                upserts: Mutex::new(0),
                failing_symbol: None,
            }
        }

        fn rejecting_summary(symbol: &'static str) -> Self {
            Self {
                down: Mutex::new(false),
                failing_symbol: Some(symbol),
                ..Self::down()
            }
        }

        fn outage(&self) -> Result<(), StoreError> {
            if *self.down.lock() {
                Err(StoreError::Unavailable {
                    message: "connection refused".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl TradeStore for OutageStore {
        async fn insert_trades(
            &self,
            trades: &[crate::domain::trade::NormalizedTrade],
        ) -> Result<usize, StoreError> {
            self.outage()?;
            self.inner.insert_trades(trades).await
        }

        async fn upsert_summary(
            &self,
            symbol: &str,
            delta: &crate::domain::trade::SymbolDelta,
        ) -> Result<(), StoreError> {
            *self.upserts.lock() += 1;
            if self.failing_symbol == Some(symbol) {
                return Err(StoreError::Unavailable {
                    message: format!("summary row for {symbol} is locked"),
                });
            }
            self.inner.upsert_summary(symbol, delta).await
        }

        async fn write_atomic(
            &self,
            trades: &[crate::domain::trade::NormalizedTrade],
            deltas: &crate::domain::trade::DeltaMap,
        ) -> Result<usize, StoreError> {
            self.outage()?;
            self.inner.write_atomic(trades, deltas).await
        }

        async fn list_summaries(
            &self,
        ) -> Result<Vec<crate::domain::trade::SymbolSummary>, StoreError> {
            self.inner.list_summaries().await
        }

        async fn find_trades(
            &self,
            symbol: &str,
            before: Option<crate::domain::pagination::PaginationCursor>,
            limit: usize,
        ) -> Result<Vec<crate::domain::trade::NormalizedTrade>, StoreError> {
            self.inner.find_trades(symbol, before, limit).await
        }
    }

    #[tokio::test]
    async fn persistence_error_skips_aggregates_and_retries() {
        for strategy in [ExecutionStrategy::Independent, ExecutionStrategy::Atomic] {
            let store = Arc::new(OutageStore::down());
            let coordinator =
                PipelineCoordinator::new(Arc::clone(&store), strategy, Duration::from_secs(1));
            let msg = message(3, TWO_SYMBOLS);

            let failed = coordinator.process(&msg).await;
            assert_eq!(failed.stage, Stage::WriteFailed, "{strategy:?}");
            assert_eq!(failed.disposition, Disposition::Retry);
            assert_eq!(*store.upserts.lock(), 0);
            assert!(store.list_summaries().await.unwrap().is_empty());

            *store.down.lock() = false;
            let recovered = coordinator.process(&msg).await;
            assert!(recovered.should_acknowledge());
            assert_eq!(recovered.inserted, 3);
            assert_eq!(store.inner.trade_count(), 3);
        }
    }

    #[tokio::test]
    async fn independent_summary_failure_is_reported_and_acknowledged() {
        let store = Arc::new(OutageStore::rejecting_summary("AAPL"));
        let coordinator = PipelineCoordinator::new(
            Arc::clone(&store),
            ExecutionStrategy::Independent,
            Duration::from_secs(1),
        );

        let report = coordinator.process(&message(9, TWO_SYMBOLS)).await;

        assert_eq!(report.stage, Stage::Aggregated);
        assert_eq!(report.disposition, Disposition::Acknowledge);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.aggregate_failures.len(), 1);
        assert_eq!(report.aggregate_failures[0].symbol, "AAPL");
        assert_eq!(*store.upserts.lock(), 2);
        assert_eq!(store.inner.trade_count(), 3);

        let summaries = store.list_summaries().await.unwrap();
        let symbols: Vec<_> = summaries.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, ["MSFT"]);
        assert_eq!(summaries[0].trade_count, 1);
    }
}
