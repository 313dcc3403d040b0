//! Finnhub Feed Ingestor
//!
//! WebSocket client for Finnhub's real-time trade stream.
//!
//! # Protocol
//!
//! - Subscribe: `{"type":"subscribe","symbol":"AAPL"}`, one per symbol
//! - Trades: `{"type":"trade","data":[{"s":..,"p":..,"v":..,"t":..}]}`
//! - Keep-alive: `{"type":"ping"}`

mod client;
mod messages;

pub use client::{
    ConnectionState, FeedClientError, FeedEvent, FeedState, FinnhubClient, FinnhubClientConfig,
};
pub use messages::{FrameKind, SubscribeRequest};
