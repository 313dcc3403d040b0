//! Keyset Pagination Integration Tests
//!
//! Walks pages through the query service over a SQLite store populated by
//! the pipeline itself.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tick_pipeline::{
    ExecutionStrategy, PipelineCoordinator, QueryError, RawMessage, SqliteTradeStore,
    TradeQueryService,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// One message per trade, `count` trades one second apart.
async fn seed(store: &Arc<SqliteTradeStore>, symbol: &str, count: u64) {
    let coordinator =
        PipelineCoordinator::new(Arc::clone(store), ExecutionStrategy::Atomic, TIMEOUT);
    for offset in 0..count {
        let time = 1_700_000_000_000 + offset * 1_000;
        let payload = format!(
            r#"{{"type":"trade","data":[{{"s":"{symbol}","p":100.5,"v":1,"t":{time}}}]}}"#
        );
        let report = coordinator
            .process(&RawMessage::new(symbol.to_string(), 0, offset, payload.into_bytes()))
            .await;
        assert!(report.should_acknowledge());
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<SqliteTradeStore> {
    Arc::new(SqliteTradeStore::open(dir.path().join("trades.db")).unwrap())
}

#[tokio::test]
async fn pages_cover_every_trade_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    seed(&store, "AAPL", 25).await;
    seed(&store, "MSFT", 3).await;

    let query = TradeQueryService::new(Arc::clone(&store), 50, TIMEOUT);
    let mut seen = HashSet::new();
    let mut sizes = Vec::new();
    let mut before = None;
    let mut last_time = i64::MAX;

    loop {
        let page = query.list_trades("AAPL", Some(10), before).await.unwrap();
        sizes.push(page.trades.len());
        for trade in &page.trades {
            assert_eq!(trade.symbol, "AAPL");
            assert!(trade.event_time_ms() < last_time);
            last_time = trade.event_time_ms();
            assert!(seen.insert(trade.idempotency_key.clone()));
        }
        match page.next_cursor {
            Some(cursor) => before = Some(cursor.as_millis()),
            None => break,
        }
    }

    assert_eq!(sizes, [10, 10, 5]);
    assert_eq!(seen.len(), 25);
}

#[tokio::test]
async fn exact_multiple_ends_with_an_empty_page() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    seed(&store, "AAPL", 20).await;

    let query = TradeQueryService::new(Arc::clone(&store), 50, TIMEOUT);
    let first = query.list_trades("AAPL", Some(10), None).await.unwrap();
    let second = query
        .list_trades("AAPL", Some(10), first.next_cursor.map(|c| c.as_millis()))
        .await
        .unwrap();
    assert_eq!(second.trades.len(), 10);

    let cursor = second.next_cursor.map(|c| c.as_millis());
    assert!(cursor.is_some());
    let third = query.list_trades("AAPL", Some(10), cursor).await.unwrap();
    assert!(third.trades.is_empty());
    assert!(third.next_cursor.is_none());
}

#[tokio::test]
async fn defaults_apply_to_missing_or_non_positive_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    seed(&store, "AAPL", 8).await;

    let query = TradeQueryService::new(Arc::clone(&store), 5, TIMEOUT);

    let page = query.list_trades("AAPL", None, None).await.unwrap();
    assert_eq!(page.trades.len(), 5);

    let page = query.list_trades("AAPL", Some(0), Some(-1)).await.unwrap();
    assert_eq!(page.trades.len(), 5);
    assert_eq!(page.trades[0].event_time_ms(), 1_700_000_007_000);
}

#[tokio::test]
async fn symbols_and_unknown_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    seed(&store, "MSFT", 2).await;
    seed(&store, "AAPL", 1).await;

    let query = TradeQueryService::new(Arc::clone(&store), 50, TIMEOUT);
    assert_eq!(query.list_symbols().await.unwrap(), ["AAPL", "MSFT"]);

    let page = query.list_trades("TSLA", None, None).await.unwrap();
    assert!(page.trades.is_empty());
    assert!(page.next_cursor.is_none());

    assert!(matches!(
        query.list_trades("  ", None, None).await,
        Err(QueryError::EmptySymbol)
    ));
}
