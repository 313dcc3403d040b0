//! SQLite Trade Store
//!
//! `TradeStore` over a single `rusqlite` connection. Calls run on the
//! blocking pool; the connection mutex serializes them, so each batch
//! insert and each atomic write is one transaction with no interleaving.
//!
//! Decimals are stored as canonical text and event times as Unix
//! milliseconds.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, Transaction, params};
use rust_decimal::Decimal;

use crate::application::ports::{StoreError, TradeStore};
use crate::domain::pagination::PaginationCursor;
use crate::domain::trade::{
    DeltaMap, IdempotencyKey, NormalizedTrade, SymbolDelta, SymbolSummary,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trades (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    idempotency_key TEXT    NOT NULL UNIQUE,
    symbol          TEXT    NOT NULL,
    price           TEXT    NOT NULL,
    volume          TEXT    NOT NULL,
    event_time      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_symbol_time
    ON trades (symbol, event_time DESC, idempotency_key DESC);
CREATE TABLE IF NOT EXISTS symbols (
    symbol        TEXT    PRIMARY KEY,
    trade_count   INTEGER NOT NULL,
    last_trade_at INTEGER NOT NULL
);
";

const INSERT_TRADE: &str = "
INSERT INTO trades (idempotency_key, symbol, price, volume, event_time)
VALUES (?1, ?2, ?3, ?4, ?5)";

const UPSERT_SUMMARY: &str = "
INSERT INTO symbols (symbol, trade_count, last_trade_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(symbol) DO UPDATE SET
    trade_count   = trade_count + excluded.trade_count,
    last_trade_at = MAX(last_trade_at, excluded.last_trade_at)";

const SELECT_SUMMARIES: &str = "
SELECT symbol, trade_count, last_trade_at FROM symbols ORDER BY symbol ASC";

const SELECT_TRADES: &str = "
SELECT symbol, price, volume, event_time, idempotency_key
FROM trades
WHERE symbol = ?1 AND (?2 IS NULL OR event_time < ?2)
ORDER BY event_time DESC, idempotency_key DESC
LIMIT ?3";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `TradeStore` backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteTradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTradeStore {
    /// Open (or create) the database at `path` and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
        }

        let conn = Connection::open(path).map_err(map_open_error)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(map_open_error)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(map_open_error)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(map_open_error)?;

        tracing::info!(path = %path.display(), journal_mode = %mode, "SQLite store opened");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_open_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(map_open_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            call(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable {
            message: format!("store task failed: {e}"),
        })?
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn insert_trades(&self, trades: &[NormalizedTrade]) -> Result<usize, StoreError> {
        let trades = trades.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(map_error)?;
            let inserted = insert_all(&tx, &trades)?;
            tx.commit().map_err(map_error)?;
            Ok(inserted)
        })
        .await
    }

    async fn upsert_summary(&self, symbol: &str, delta: &SymbolDelta) -> Result<(), StoreError> {
        let symbol = symbol.to_string();
        let delta = *delta;
        self.run(move |conn| upsert(conn, &symbol, &delta)).await
    }

    async fn write_atomic(
        &self,
        trades: &[NormalizedTrade],
        deltas: &DeltaMap,
    ) -> Result<usize, StoreError> {
        let trades = trades.to_vec();
        let deltas = deltas.clone();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(map_error)?;
            let inserted = insert_all(&tx, &trades)?;
            for (symbol, delta) in &deltas {
                upsert(&tx, symbol, delta)?;
            }
            tx.commit().map_err(map_error)?;
            Ok(inserted)
        })
        .await
    }

    async fn list_summaries(&self) -> Result<Vec<SymbolSummary>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare_cached(SELECT_SUMMARIES).map_err(map_error)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .map_err(map_error)?;

            rows.map(|row| {
                let (symbol, count, last_ms) = row.map_err(map_error)?;
                Ok(SymbolSummary {
                    symbol,
                    trade_count: u64::try_from(count).unwrap_or(0),
                    last_trade_at: millis_to_time(last_ms)?,
                })
            })
            .collect()
        })
        .await
    }

    async fn find_trades(
        &self,
        symbol: &str,
        before: Option<PaginationCursor>,
        limit: usize,
    ) -> Result<Vec<NormalizedTrade>, StoreError> {
        let symbol = symbol.to_string();
        let before = before.map(PaginationCursor::as_millis);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(SELECT_TRADES).map_err(map_error)?;
            let rows = stmt
                .query_map(params![symbol, before, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(map_error)?;

            rows.map(|row| {
                let (symbol, price, volume, event_ms, key) = row.map_err(map_error)?;
                Ok(NormalizedTrade {
                    symbol,
                    price: parse_stored_decimal(&price)?,
                    volume: parse_stored_decimal(&volume)?,
                    event_time: millis_to_time(event_ms)?,
                    idempotency_key: IdempotencyKey::from_stored(key),
                })
            })
            .collect()
        })
        .await
    }
}

// =============================================================================
// Statements
// =============================================================================

fn insert_all(tx: &Transaction<'_>, trades: &[NormalizedTrade]) -> Result<usize, StoreError> {
    let mut stmt = tx.prepare_cached(INSERT_TRADE).map_err(map_error)?;
    for trade in trades {
        stmt.execute(params![
            trade.idempotency_key.as_str(),
            trade.symbol,
            trade.price.to_string(),
            trade.volume.to_string(),
            trade.event_time_ms(),
        ])
        .map_err(|e| map_insert_error(e, &trade.idempotency_key))?;
    }
    Ok(trades.len())
}

fn upsert(conn: &Connection, symbol: &str, delta: &SymbolDelta) -> Result<(), StoreError> {
    conn.prepare_cached(UPSERT_SUMMARY)
        .and_then(|mut stmt| {
            stmt.execute(params![
                symbol,
                i64::try_from(delta.count).unwrap_or(i64::MAX),
                delta.max_event_time.timestamp_millis(),
            ])
        })
        .map_err(map_error)?;
    Ok(())
}

// =============================================================================
// Conversions
// =============================================================================

fn millis_to_time(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::Query {
        message: format!("stored timestamp {millis} is out of range"),
    })
}

fn parse_stored_decimal(text: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(text).map_err(|e| StoreError::Query {
        message: format!("stored decimal '{text}' is unreadable: {e}"),
    })
}

fn map_insert_error(err: rusqlite::Error, key: &IdempotencyKey) -> StoreError {
    if is_unique_violation(&err, "trades.idempotency_key") {
        StoreError::DuplicateKey {
            key: key.as_str().to_string(),
        }
    } else {
        map_error(err)
    }
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, Some(message))
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && message.contains(column)
    )
}

fn map_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _) => match code.code {
            ErrorCode::ConstraintViolation => StoreError::Constraint {
                message: err.to_string(),
            },
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull => StoreError::Unavailable {
                message: err.to_string(),
            },
            _ => StoreError::Query {
                message: err.to_string(),
            },
        },
        _ => StoreError::Query {
            message: err.to_string(),
        },
    }
}

fn map_open_error(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable {
        message: err.to_string(),
    }
}
