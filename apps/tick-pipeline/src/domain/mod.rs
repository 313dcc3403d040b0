//! Domain Layer - Core trade types and business rules.
//!
//! This layer contains the pipeline's value types with no I/O. Everything
//! here is pure Rust with serialization support.

/// Raw queue messages and their delivery metadata.
pub mod message;

/// Normalized trades, idempotency keys, and per-symbol aggregates.
pub mod trade;

/// Keyset pagination cursors and pages.
pub mod pagination;
