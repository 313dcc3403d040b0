//! Keyset Pagination
//!
//! Pages walk a symbol's trades from newest to oldest. The cursor is the
//! event time of the oldest trade on the previous page; the next page holds
//! trades strictly older than it.

use serde::{Deserialize, Serialize};

use super::trade::NormalizedTrade;

/// Page size used when the caller supplies none.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Opaque position in a symbol's trade history (Unix milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaginationCursor(i64);

impl PaginationCursor {
    /// Build a cursor from a client-supplied timestamp.
    ///
    /// Non-positive values mean "start from the most recent trade" and
    /// yield `None`.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Option<Self> {
        if millis > 0 { Some(Self(millis)) } else { None }
    }

    /// Cursor positioned just after `trade` (older trades follow).
    #[must_use]
    pub fn after(trade: &NormalizedTrade) -> Self {
        Self(trade.event_time_ms())
    }

    /// Timestamp carried by the cursor.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

/// A resolved page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Symbol to page through.
    pub symbol: String,
    /// Maximum trades to return, always positive.
    pub limit: usize,
    /// Exclusive upper bound on event time; `None` starts at the newest.
    pub before: Option<PaginationCursor>,
}

impl PageRequest {
    /// Resolve raw client parameters.
    ///
    /// A missing or non-positive `limit` falls back to `default_limit`; a
    /// missing or non-positive `before` starts from the newest trade.
    #[must_use]
    pub fn resolve(
        symbol: impl Into<String>,
        limit: Option<i64>,
        before: Option<i64>,
        default_limit: usize,
    ) -> Self {
        let limit = limit
            .filter(|l| *l > 0)
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(default_limit)
            .max(1);

        Self {
            symbol: symbol.into(),
            limit,
            before: before.and_then(PaginationCursor::from_millis),
        }
    }
}

/// One page of trades, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradePage {
    /// Trades ordered by event time descending.
    pub trades: Vec<NormalizedTrade>,
    /// Cursor for the next page; `None` when this page was short.
    pub next_cursor: Option<PaginationCursor>,
}

impl TradePage {
    /// Build a page from the rows a range scan returned for `limit`.
    ///
    /// A full page yields a cursor at its oldest trade; a short page ends
    /// the walk.
    #[must_use]
    pub fn from_rows(trades: Vec<NormalizedTrade>, limit: usize) -> Self {
        let next_cursor = if trades.len() == limit {
            trades.last().map(PaginationCursor::after)
        } else {
            None
        };
        Self {
            trades,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::trade::IdempotencyKey;

    fn trade(ms: i64) -> NormalizedTrade {
        NormalizedTrade {
            symbol: "AAPL".to_string(),
            price: Decimal::ONE,
            volume: Decimal::ONE,
            event_time: DateTime::from_timestamp_millis(ms).unwrap(),
            idempotency_key: IdempotencyKey::derive("t", 0, 0, "AAPL", ms, 0),
        }
    }

    #[test]
    fn non_positive_cursor_means_latest() {
        assert_eq!(PaginationCursor::from_millis(0), None);
        assert_eq!(PaginationCursor::from_millis(-5), None);
        assert_eq!(
            PaginationCursor::from_millis(10).map(PaginationCursor::as_millis),
            Some(10)
        );
    }

    #[test]
    fn resolve_applies_defaults() {
        let req = PageRequest::resolve("AAPL", None, None, 50);
        assert_eq!(req.limit, 50);
        assert_eq!(req.before, None);

        let req = PageRequest::resolve("AAPL", Some(0), Some(0), 50);
        assert_eq!(req.limit, 50);
        assert_eq!(req.before, None);

        let req = PageRequest::resolve("AAPL", Some(-3), Some(-1), 25);
        assert_eq!(req.limit, 25);

        let req = PageRequest::resolve("AAPL", Some(10), Some(1_700_000_000_000), 50);
        assert_eq!(req.limit, 10);
        assert_eq!(req.before.map(PaginationCursor::as_millis), Some(1_700_000_000_000));
    }

    #[test]
    fn full_page_carries_cursor_at_oldest_trade() {
        let page = TradePage::from_rows(vec![trade(300), trade(200), trade(100)], 3);
        assert_eq!(page.next_cursor.map(PaginationCursor::as_millis), Some(100));
    }

    #[test]
    fn short_page_has_no_cursor() {
        let page = TradePage::from_rows(vec![trade(300), trade(200)], 3);
        assert_eq!(page.next_cursor, None);

        let empty = TradePage::from_rows(Vec::new(), 3);
        assert_eq!(empty.next_cursor, None);
    }
}
