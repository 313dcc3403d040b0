//! Finnhub WebSocket Messages
//!
//! Outbound subscription requests and the minimal inbound frame header the
//! ingestor needs to route frames. Trade payloads are not decoded here; they
//! travel verbatim to the queue.

use serde::{Deserialize, Serialize};

/// Subscription request, one per symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    symbol: &'a str,
}

impl<'a> SubscribeRequest<'a> {
    /// Subscribe to trades for `symbol`.
    #[must_use]
    pub const fn subscribe(symbol: &'a str) -> Self {
        Self {
            kind: "subscribe",
            symbol,
        }
    }

    /// Unsubscribe from `symbol`.
    #[must_use]
    pub const fn unsubscribe(symbol: &'a str) -> Self {
        Self {
            kind: "unsubscribe",
            symbol,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    kind: Option<String>,
    msg: Option<String>,
}

/// How an inbound text frame is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Keep-alive; dropped at the edge.
    Ping,
    /// Server-reported error; published and surfaced as a feed error.
    Error(String),
    /// Anything else, published verbatim under its `type` (or "unknown").
    Data(String),
}

impl FrameKind {
    /// Classify a text frame by its `type` field.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        let Ok(header) = serde_json::from_str::<FrameHeader>(text) else {
            return Self::Data("unknown".to_string());
        };
        match header.kind.as_deref() {
            Some("ping") => Self::Ping,
            Some("error") => Self::Error(header.msg.unwrap_or_default()),
            Some(kind) => Self::Data(kind.to_string()),
            None => Self::Data("unknown".to_string()),
        }
    }
}
