//! Trade Domain Types
//!
//! - `NormalizedTrade`: one validated market trade, immutable once built
//! - `IdempotencyKey`: deterministic identity of a tick across redeliveries
//! - `SymbolDelta`: the aggregate contribution of one batch to one symbol
//! - `SymbolSummary`: the persisted per-symbol aggregate
//! - `TradeBatch`: everything the normalizer extracted from one message

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Idempotency Key
// =============================================================================

/// Deterministic identifier of a single upstream tick.
///
/// Formatted as `{stream}-{partition}-{offset}-{symbol}-{event_time_ms}-{index}`.
/// The trailing two fields are always integers, so the symbol is recovered
/// unambiguously by splitting from the right once the stream name is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key for the tick at `index` within the message at
    /// `(stream, partition, offset)`.
    #[must_use]
    pub fn derive(
        stream: &str,
        partition: u32,
        offset: u64,
        symbol: &str,
        event_time_ms: i64,
        index: usize,
    ) -> Self {
        Self(format!(
            "{stream}-{partition}-{offset}-{symbol}-{event_time_ms}-{index}"
        ))
    }

    /// Wrap a key read back from storage.
    #[must_use]
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Normalized Trade
// =============================================================================

/// A single validated trade tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTrade {
    /// Ticker symbol, never empty.
    pub symbol: String,
    /// Exact trade price, non-negative.
    pub price: Decimal,
    /// Exact traded volume, non-negative.
    pub volume: Decimal,
    /// Exchange event time, millisecond precision.
    pub event_time: DateTime<Utc>,
    /// Deduplication identity.
    pub idempotency_key: IdempotencyKey,
}

impl NormalizedTrade {
    /// Event time as Unix milliseconds.
    #[must_use]
    pub fn event_time_ms(&self) -> i64 {
        self.event_time.timestamp_millis()
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Per-symbol aggregate contribution of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolDelta {
    /// Number of trades to add to the symbol's count.
    pub count: u64,
    /// Latest event time in the batch for this symbol.
    pub max_event_time: DateTime<Utc>,
}

impl SymbolDelta {
    /// Delta for a single trade.
    #[must_use]
    pub const fn single(event_time: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            max_event_time: event_time,
        }
    }

    /// Fold one more trade into the delta.
    pub fn record(&mut self, event_time: DateTime<Utc>) {
        self.count += 1;
        if event_time > self.max_event_time {
            self.max_event_time = event_time;
        }
    }
}

/// Deltas keyed by symbol, iterated in ascending symbol order.
pub type DeltaMap = BTreeMap<String, SymbolDelta>;

/// Build the per-symbol deltas for a slice of trades.
#[must_use]
pub fn deltas_for(trades: &[NormalizedTrade]) -> DeltaMap {
    let mut deltas = DeltaMap::new();
    for trade in trades {
        deltas
            .entry(trade.symbol.clone())
            .and_modify(|d| d.record(trade.event_time))
            .or_insert_with(|| SymbolDelta::single(trade.event_time));
    }
    deltas
}

/// Persisted per-symbol aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSummary {
    /// Ticker symbol (unique).
    pub symbol: String,
    /// Total trades recorded for the symbol.
    pub trade_count: u64,
    /// Latest event time seen for the symbol.
    pub last_trade_at: DateTime<Utc>,
}

impl SymbolSummary {
    /// Summary created by the first delta for a symbol.
    #[must_use]
    pub fn from_delta(symbol: impl Into<String>, delta: &SymbolDelta) -> Self {
        Self {
            symbol: symbol.into(),
            trade_count: delta.count,
            last_trade_at: delta.max_event_time,
        }
    }

    /// Apply a delta: increment the count, raise the timestamp to the max.
    pub fn apply(&mut self, delta: &SymbolDelta) {
        self.trade_count = self.trade_count.saturating_add(delta.count);
        if delta.max_event_time > self.last_trade_at {
            self.last_trade_at = delta.max_event_time;
        }
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Why a single tick was dropped from its batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickRejection {
    /// The tick is not a JSON object.
    #[error("tick is not an object")]
    NotAnObject,
    /// Symbol missing, empty, or not a string.
    #[error("missing or empty symbol")]
    MissingSymbol,
    /// Event time missing or not an integer millisecond timestamp.
    #[error("invalid event time: {0}")]
    InvalidEventTime(String),
    /// Price not representable as a non-negative exact decimal.
    #[error("invalid price: {0}")]
    InvalidPrice(String),
    /// Volume not representable as a non-negative exact decimal.
    #[error("invalid volume: {0}")]
    InvalidVolume(String),
}

/// A tick that was dropped, with its position in the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedTick {
    /// Zero-based position within the message's tick array.
    pub index: usize,
    /// Reason the tick was dropped.
    pub reason: TickRejection,
}

/// Trades extracted from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeBatch {
    /// Valid trades in message order.
    pub trades: Vec<NormalizedTrade>,
    /// Per-symbol deltas covering exactly `trades`.
    pub deltas: DeltaMap,
    /// Ticks that failed validation.
    pub dropped: Vec<DroppedTick>,
}

impl TradeBatch {
    /// Number of valid trades.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    /// Whether the batch carries no valid trades.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn trade(symbol: &str, ms: i64, index: usize) -> NormalizedTrade {
        NormalizedTrade {
            symbol: symbol.to_string(),
            price: Decimal::new(10, 0),
            volume: Decimal::ONE,
            event_time: ts(ms),
            idempotency_key: IdempotencyKey::derive("t", 0, 0, symbol, ms, index),
        }
    }

    #[test]
    fn key_format_matches_documented_layout() {
        let key = IdempotencyKey::derive("t", 1, 42, "AAPL", 1_678_886_400_123, 0);
        assert_eq!(key.as_str(), "t-1-42-AAPL-1678886400123-0");
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn key_index_distinguishes_identical_ticks() {
        let a = IdempotencyKey::derive("t", 0, 5, "AAPL", 1000, 0);
        let b = IdempotencyKey::derive("t", 0, 5, "AAPL", 1000, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn deltas_count_and_take_max_time() {
        let trades = vec![
            trade("MSFT", 2000, 0),
            trade("AAPL", 3000, 1),
            trade("MSFT", 1000, 2),
        ];
        let deltas = deltas_for(&trades);

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas["MSFT"].count, 2);
        assert_eq!(deltas["MSFT"].max_event_time, ts(2000));
        assert_eq!(deltas["AAPL"].count, 1);

        let symbols: Vec<_> = deltas.keys().cloned().collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn summary_apply_is_commutative() {
        let d1 = SymbolDelta {
            count: 2,
            max_event_time: ts(500),
        };
        let d2 = SymbolDelta {
            count: 3,
            max_event_time: ts(100),
        };

        let mut a = SymbolSummary::from_delta("AAPL", &d1);
        a.apply(&d2);
        let mut b = SymbolSummary::from_delta("AAPL", &d2);
        b.apply(&d1);

        assert_eq!(a, b);
        assert_eq!(a.trade_count, 5);
        assert_eq!(a.last_trade_at, ts(500));
    }

    #[test]
    fn summary_timestamp_never_decreases() {
        let mut summary = SymbolSummary::from_delta("AAPL", &SymbolDelta::single(ts(900)));
        summary.apply(&SymbolDelta::single(ts(100)));
        assert_eq!(summary.last_trade_at, ts(900));
        assert_eq!(summary.trade_count, 2);
    }
}
