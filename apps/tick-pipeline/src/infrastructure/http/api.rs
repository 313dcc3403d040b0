//! Read API
//!
//! - `GET /api/v1/symbols`
//! - `GET /api/v1/trades/{symbol}?limit=&before=`
//!
//! Every response uses the `{success, data, error}` envelope. Each request
//! runs under the configured deadline; expiry answers 504.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::application::ports::TradeStore;
use crate::application::services::QueryError;
use crate::domain::pagination::{PaginationCursor, TradePage};
use crate::domain::trade::{NormalizedTrade, SymbolSummary};

// =============================================================================
// Envelope and DTOs
// =============================================================================

/// Response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    pub data: Option<T>,
    /// Message on failure.
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// `GET /api/v1/symbols` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct SymbolsData {
    /// Tracked symbols, ascending.
    pub available: Vec<SymbolSummary>,
}

/// One trade as served by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct TradeDto {
    /// Ticker symbol.
    pub symbol: String,
    /// Exact price as decimal text.
    pub price: String,
    /// Exact volume as decimal text.
    pub volume: String,
    /// Event time.
    pub time: DateTime<Utc>,
    /// Deduplication identity.
    pub idempotency_key: String,
}

impl From<NormalizedTrade> for TradeDto {
    fn from(trade: NormalizedTrade) -> Self {
        Self {
            price: trade.price.to_string(),
            volume: trade.volume.to_string(),
            time: trade.event_time,
            idempotency_key: trade.idempotency_key.as_str().to_string(),
            symbol: trade.symbol,
        }
    }
}

/// `GET /api/v1/trades/{symbol}` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct TradesData {
    /// Trades, newest first.
    pub trades: Vec<TradeDto>,
    /// Pass as `before` to fetch the next page; `null` on the last page.
    pub next_cursor: Option<i64>,
}

impl From<TradePage> for TradesData {
    fn from(page: TradePage) -> Self {
        Self {
            trades: page.trades.into_iter().map(TradeDto::from).collect(),
            next_cursor: page.next_cursor.map(PaginationCursor::as_millis),
        }
    }
}

/// Raw query parameters; parsed by hand so bad values get our own message.
#[derive(Debug, Default, Deserialize)]
pub(super) struct TradesParams {
    limit: Option<String>,
    before: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// API error mapped onto an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// `limit` was not an integer.
    #[error("invalid 'limit' query parameter: must be a positive integer")]
    InvalidLimit,

    /// `before` was not an integer.
    #[error(
        "invalid 'before' query parameter: must be a non-negative integer (Unix millisecond timestamp)"
    )]
    InvalidCursor,

    /// No symbol in the path.
    #[error("please provide symbol")]
    MissingSymbol,

    /// The request deadline expired.
    #[error("request timed out")]
    Timeout,

    /// The store failed.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidLimit | Self::InvalidCursor | Self::MissingSymbol => {
                StatusCode::BAD_REQUEST
            }
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        match err {
            QueryError::EmptySymbol => Self::MissingSymbol,
            QueryError::Store(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Read request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Read request rejected");
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub(super) async fn list_symbols<S>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ApiResponse<SymbolsData>>, ApiError>
where
    S: TradeStore + 'static,
{
    let available = within_deadline(state.request_timeout, state.query.list_summaries()).await?;
    Ok(Json(ApiResponse::ok(SymbolsData { available })))
}

pub(super) async fn list_trades<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(symbol): Path<String>,
    Query(params): Query<TradesParams>,
) -> Result<Json<ApiResponse<TradesData>>, ApiError>
where
    S: TradeStore + 'static,
{
    if symbol.trim().is_empty() {
        return Err(ApiError::MissingSymbol);
    }
    let limit = parse_integer(params.limit.as_deref()).map_err(|()| ApiError::InvalidLimit)?;
    let before = parse_integer(params.before.as_deref()).map_err(|()| ApiError::InvalidCursor)?;

    let page = within_deadline(
        state.request_timeout,
        state.query.list_trades(&symbol, limit, before),
    )
    .await?;
    Ok(Json(ApiResponse::ok(TradesData::from(page))))
}

pub(super) async fn missing_symbol() -> ApiError {
    ApiError::MissingSymbol
}

async fn within_deadline<T, F>(timeout: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ApiError::Timeout)?
        .map_err(ApiError::from)
}

/// Absent or blank parses to `None`; anything but an integer is an error.
fn parse_integer(raw: Option<&str>) -> Result<Option<i64>, ()> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<i64>().map(Some).map_err(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_parameters() {
        assert_eq!(parse_integer(None), Ok(None));
        assert_eq!(parse_integer(Some(" ")), Ok(None));
        assert_eq!(parse_integer(Some("25")), Ok(Some(25)));
        assert_eq!(parse_integer(Some("-1")), Ok(Some(-1)));
        assert_eq!(parse_integer(Some("ten")), Err(()));
        assert_eq!(parse_integer(Some("1.5")), Err(()));
    }

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(ApiError::InvalidLimit.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::from(QueryError::Store(crate::application::ports::StoreError::Timeout {
                operation: "find_trades",
                timeout_ms: 10,
            }))
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
