//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration from environment variables.
pub mod config;

/// Finnhub WebSocket feed ingestor.
pub mod finnhub;

/// Read API and health endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Trade store adapters (SQLite, in-memory).
pub mod persistence;

/// Partitioned in-process message queue.
pub mod queue;

/// OpenTelemetry tracing integration.
pub mod telemetry;
