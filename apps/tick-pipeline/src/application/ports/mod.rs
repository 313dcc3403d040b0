//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TradeStore`: Durable trade records and per-symbol summaries
//! - `MessageSource`: Ordered, at-least-once delivery from one partition
//! - `MessageSink`: Publishing raw feed payloads onto the queue

mod message_queue_port;
mod trade_store_port;

pub use message_queue_port::{MessageSink, MessageSource, QueueError};
pub use trade_store_port::{StoreError, TradeStore};
