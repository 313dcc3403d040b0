//! Raw Message
//!
//! An opaque payload as delivered by the queue, together with the
//! coordinates that identify the delivery: stream name, partition and
//! offset. Redelivery of the same message yields the same coordinates.

use std::fmt;
use std::sync::Arc;

/// A message received from the queue, prior to any parsing.
#[derive(Clone, PartialEq, Eq)]
pub struct RawMessage {
    stream: Arc<str>,
    partition: u32,
    offset: u64,
    payload: Arc<[u8]>,
}

impl RawMessage {
    /// Create a new raw message.
    #[must_use]
    pub fn new(
        stream: impl Into<Arc<str>>,
        partition: u32,
        offset: u64,
        payload: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            stream: stream.into(),
            partition,
            offset,
            payload: payload.into(),
        }
    }

    /// Stream (topic) the message was read from.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Partition the message was read from.
    #[must_use]
    pub const fn partition(&self) -> u32 {
        self.partition
    }

    /// Sequential offset within the partition.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("stream", &self.stream)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_return_delivery_coordinates() {
        let msg = RawMessage::new("trades", 3, 17, b"{}".to_vec());
        assert_eq!(msg.stream(), "trades");
        assert_eq!(msg.partition(), 3);
        assert_eq!(msg.offset(), 17);
        assert_eq!(msg.payload(), b"{}");
    }

    #[test]
    fn debug_omits_payload_bytes() {
        let msg = RawMessage::new("trades", 0, 0, b"secret-ish".to_vec());
        let debug = format!("{msg:?}");
        assert!(debug.contains("payload_len: 10"));
        assert!(!debug.contains("secret-ish"));
    }
}
