//! In-Memory Trade Store
//!
//! Process-local implementation of `TradeStore` used by tests and by
//! `STORE_BACKEND=memory`. One lock guards trades and summaries together,
//! which makes `write_atomic` trivially all-or-nothing.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{StoreError, TradeStore};
use crate::domain::pagination::PaginationCursor;
use crate::domain::trade::{DeltaMap, NormalizedTrade, SymbolDelta, SymbolSummary};

#[derive(Default)]
struct StoreState {
    trades: Vec<NormalizedTrade>,
    keys: HashSet<String>,
    summaries: BTreeMap<String, SymbolSummary>,
}

impl StoreState {
    /// First key in `trades` that already exists or repeats within the batch.
    fn find_conflict(&self, trades: &[NormalizedTrade]) -> Option<String> {
        let mut batch = HashSet::with_capacity(trades.len());
        trades
            .iter()
            .map(|t| t.idempotency_key.as_str())
            .find(|key| self.keys.contains(*key) || !batch.insert(*key))
            .map(str::to_string)
    }

    fn insert_all(&mut self, trades: &[NormalizedTrade]) -> Result<usize, StoreError> {
        if let Some(key) = self.find_conflict(trades) {
            return Err(StoreError::DuplicateKey { key });
        }
        for trade in trades {
            self.keys.insert(trade.idempotency_key.as_str().to_string());
            self.trades.push(trade.clone());
        }
        Ok(trades.len())
    }

    fn upsert(&mut self, symbol: &str, delta: &SymbolDelta) {
        self.summaries
            .entry(symbol.to_string())
            .and_modify(|s| s.apply(delta))
            .or_insert_with(|| SymbolSummary::from_delta(symbol, delta));
    }
}

/// `TradeStore` backed by process memory.
#[derive(Default)]
pub struct InMemoryTradeStore {
    state: RwLock<StoreState>,
    unavailable: RwLock<bool>,
}

impl InMemoryTradeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trade records held.
    #[must_use]
    pub fn trade_count(&self) -> usize {
        self.state.read().trades.len()
    }

    /// Simulate an outage: while set, every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if *self.unavailable.read() {
            Err(StoreError::Unavailable {
                message: "in-memory store marked unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn insert_trades(&self, trades: &[NormalizedTrade]) -> Result<usize, StoreError> {
        self.check_available()?;
        self.state.write().insert_all(trades)
    }

    async fn upsert_summary(&self, symbol: &str, delta: &SymbolDelta) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.write().upsert(symbol, delta);
        Ok(())
    }

    async fn write_atomic(
        &self,
        trades: &[NormalizedTrade],
        deltas: &DeltaMap,
    ) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.write();
        let inserted = state.insert_all(trades)?;
        for (symbol, delta) in deltas {
            state.upsert(symbol, delta);
        }
        Ok(inserted)
    }

    async fn list_summaries(&self) -> Result<Vec<SymbolSummary>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().summaries.values().cloned().collect())
    }

    async fn find_trades(
        &self,
        symbol: &str,
        before: Option<PaginationCursor>,
        limit: usize,
    ) -> Result<Vec<NormalizedTrade>, StoreError> {
        self.check_available()?;
        let state = self.state.read();
        let mut matching: Vec<&NormalizedTrade> = state
            .trades
            .iter()
            .filter(|t| t.symbol == symbol)
            .filter(|t| before.is_none_or(|c| t.event_time_ms() < c.as_millis()))
            .collect();

        matching.sort_by(|a, b| {
            b.event_time
                .cmp(&a.event_time)
                .then_with(|| b.idempotency_key.as_str().cmp(a.idempotency_key.as_str()))
        });

        Ok(matching.into_iter().take(limit).cloned().collect())
    }
}
