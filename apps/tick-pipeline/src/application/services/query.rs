//! Trade Query Service
//!
//! Read path over the trade store: the symbol list and keyset-paginated
//! trade history, newest first.

use std::sync::Arc;
use std::time::Duration;

use super::with_deadline;
use crate::application::ports::{StoreError, TradeStore};
use crate::domain::pagination::{PageRequest, TradePage};
use crate::domain::trade::SymbolSummary;
use crate::infrastructure::metrics;

/// Query failure.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// No symbol was given.
    #[error("please provide symbol")]
    EmptySymbol,

    /// The store failed or timed out.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    /// Whether the failure was a deadline expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Store(StoreError::Timeout { .. }))
    }
}

/// Read-only queries over trades and symbol summaries.
pub struct TradeQueryService<S>
where
    S: TradeStore,
{
    store: Arc<S>,
    default_limit: usize,
    timeout: Duration,
}

impl<S> TradeQueryService<S>
where
    S: TradeStore,
{
    /// Create a query service.
    #[must_use]
    pub const fn new(store: Arc<S>, default_limit: usize, timeout: Duration) -> Self {
        Self {
            store,
            default_limit,
            timeout,
        }
    }

    /// Page size used when a request omits one.
    #[must_use]
    pub const fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Fetch one page for an already resolved request.
    pub async fn page(&self, request: &PageRequest) -> Result<TradePage, QueryError> {
        if request.symbol.is_empty() {
            return Err(QueryError::EmptySymbol);
        }

        let result = with_deadline(
            "find_trades",
            self.timeout,
            self.store
                .find_trades(&request.symbol, request.before, request.limit),
        )
        .await;
        metrics::record_query("trades", result.is_ok());

        let mut trades = result?;
        trades.truncate(request.limit);

        tracing::debug!(
            symbol = %request.symbol,
            limit = request.limit,
            before = request.before.map(|c| c.as_millis()),
            returned = trades.len(),
            "Trade page fetched"
        );

        Ok(TradePage::from_rows(trades, request.limit))
    }

    /// Resolve raw client parameters and fetch one page.
    ///
    /// A missing or non-positive `limit` uses the default page size; a
    /// missing or non-positive `before` starts from the newest trade.
    pub async fn list_trades(
        &self,
        symbol: &str,
        limit: Option<i64>,
        before: Option<i64>,
    ) -> Result<TradePage, QueryError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(QueryError::EmptySymbol);
        }
        let request = PageRequest::resolve(symbol, limit, before, self.default_limit);
        self.page(&request).await
    }

    /// Every symbol with a summary, ascending.
    pub async fn list_symbols(&self) -> Result<Vec<String>, QueryError> {
        Ok(self
            .list_summaries()
            .await?
            .into_iter()
            .map(|summary| summary.symbol)
            .collect())
    }

    /// Every symbol summary, ordered by symbol.
    pub async fn list_summaries(&self) -> Result<Vec<SymbolSummary>, QueryError> {
        let result = with_deadline("list_summaries", self.timeout, self.store.list_summaries()).await;
        metrics::record_query("symbols", result.is_ok());
        Ok(result?)
    }
}
