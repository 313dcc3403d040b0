//! Message Queue Ports (Driven Ports)
//!
//! The queue decouples the feed from the pipeline. Delivery is ordered
//! within a partition and at-least-once: a message stays pending until it
//! is acknowledged, and `redeliver` puts it back at the head of its
//! partition.

use async_trait::async_trait;

use crate::domain::message::RawMessage;

/// Queue error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The partition does not exist.
    #[error("unknown partition: {0}")]
    UnknownPartition(u32),

    /// The queue has been closed for publishing.
    #[error("queue closed")]
    Closed,

    /// The target partition is at capacity.
    #[error("partition {partition} is full ({capacity} messages)")]
    Full {
        /// Partition that rejected the message.
        partition: u32,
        /// Configured per-partition capacity.
        capacity: usize,
    },

    /// Acknowledge or redeliver did not match the partition's in-flight message.
    #[error("offset {offset} is not in flight on partition {partition}")]
    NotInFlight {
        /// Partition addressed.
        partition: u32,
        /// Offset supplied by the caller.
        offset: u64,
    },
}

/// Port consumed by a pipeline worker: one partition's ordered delivery.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the queue is closed and the partition drained.
    async fn next_message(&self) -> Result<Option<RawMessage>, QueueError>;

    /// Commit the message; it will not be delivered again.
    async fn acknowledge(&self, message: &RawMessage) -> Result<(), QueueError>;

    /// Return the message to the head of its partition for another attempt.
    async fn redeliver(&self, message: &RawMessage) -> Result<(), QueueError>;
}

/// Port used by the feed ingestor to publish raw payloads.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Append a payload to the queue.
    ///
    /// Returns the `(partition, offset)` it was assigned.
    async fn publish(&self, payload: Vec<u8>) -> Result<(u32, u64), QueueError>;
}
