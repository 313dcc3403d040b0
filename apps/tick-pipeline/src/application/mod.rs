//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the trade store and the message queue.
pub mod ports;

/// Application services for ingestion, persistence, and reads.
pub mod services;
