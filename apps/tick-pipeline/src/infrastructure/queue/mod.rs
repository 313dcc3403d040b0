//! In-Memory Partitioned Queue
//!
//! Append-only log per partition with sequential offsets. Each partition
//! keeps the messages from its committed offset onward and a read cursor.
//! Only one message per partition is in flight at a time: it must be
//! acknowledged (committed, dropped from the log) or redelivered (the
//! cursor rewinds to it) before the next one is handed out.
//!
//! Publishing assigns partitions round-robin.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::application::ports::{MessageSink, MessageSource, QueueError};
use crate::domain::message::RawMessage;
use crate::infrastructure::metrics;

// =============================================================================
// Partition
// =============================================================================

#[derive(Debug, Default)]
struct PartitionState {
    /// Uncommitted messages; the front sits at `committed`.
    log: VecDeque<Arc<[u8]>>,
    /// Offset of the first uncommitted message.
    committed: u64,
    /// Offset of the next message to hand out.
    cursor: u64,
    in_flight: Option<u64>,
    closed: bool,
}

impl PartitionState {
    fn end(&self) -> u64 {
        self.committed + self.log.len() as u64
    }

    fn take_next(&mut self) -> Option<(u64, Arc<[u8]>)> {
        if self.in_flight.is_some() || self.cursor >= self.end() {
            return None;
        }
        let offset = self.cursor;
        let index = usize::try_from(offset - self.committed).ok()?;
        let payload = Arc::clone(self.log.get(index)?);
        self.in_flight = Some(offset);
        self.cursor += 1;
        Some((offset, payload))
    }
}

#[derive(Debug)]
struct Partition {
    id: u32,
    state: Mutex<PartitionState>,
    notify: Notify,
}

impl Partition {
    fn new(id: u32) -> Self {
        Self {
            id,
            state: Mutex::new(PartitionState::default()),
            notify: Notify::new(),
        }
    }

    fn check_in_flight(&self, state: &PartitionState, offset: u64) -> Result<(), QueueError> {
        if state.in_flight == Some(offset) {
            Ok(())
        } else {
            Err(QueueError::NotInFlight {
                partition: self.id,
                offset,
            })
        }
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Partitioned in-memory queue.
#[derive(Debug)]
pub struct InMemoryQueue {
    stream: Arc<str>,
    partitions: Vec<Arc<Partition>>,
    capacity: usize,
    next_partition: AtomicUsize,
    published: AtomicU64,
}

impl InMemoryQueue {
    /// Create a queue with `partitions` partitions (at least one), each
    /// holding at most `capacity` uncommitted messages.
    #[must_use]
    pub fn new(stream: impl Into<Arc<str>>, partitions: u32, capacity: usize) -> Self {
        Self {
            stream: stream.into(),
            partitions: (0..partitions.max(1))
                .map(|id| Arc::new(Partition::new(id)))
                .collect(),
            capacity: capacity.max(1),
            next_partition: AtomicUsize::new(0),
            published: AtomicU64::new(0),
        }
    }

    /// Stream name stamped on every delivered message.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        u32::try_from(self.partitions.len()).unwrap_or(u32::MAX)
    }

    /// Total messages accepted since creation.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Uncommitted messages across all partitions.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.partitions.iter().map(|p| p.state.lock().log.len()).sum()
    }

    /// Consumer bound to one partition.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::UnknownPartition` if the partition does not exist.
    pub fn consumer(&self, partition: u32) -> Result<PartitionConsumer, QueueError> {
        let handle = usize::try_from(partition)
            .ok()
            .and_then(|i| self.partitions.get(i))
            .ok_or(QueueError::UnknownPartition(partition))?;
        Ok(PartitionConsumer {
            stream: Arc::clone(&self.stream),
            partition: Arc::clone(handle),
        })
    }

    /// Append a payload to a specific partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition does not exist, is full, or the
    /// queue is closed.
    pub fn publish_to(&self, partition: u32, payload: Vec<u8>) -> Result<u64, QueueError> {
        let handle = usize::try_from(partition)
            .ok()
            .and_then(|i| self.partitions.get(i))
            .ok_or(QueueError::UnknownPartition(partition))?;

        let offset = {
            let mut state = handle.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.log.len() >= self.capacity {
                return Err(QueueError::Full {
                    partition,
                    capacity: self.capacity,
                });
            }
            let offset = state.end();
            state.log.push_back(payload.into());
            offset
        };

        handle.notify.notify_waiters();
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_published(partition);
        Ok(offset)
    }

    /// Stop accepting messages. Consumers drain what remains, then end.
    pub fn close(&self) {
        for partition in &self.partitions {
            partition.state.lock().closed = true;
            partition.notify.notify_waiters();
        }
        tracing::info!(stream = %self.stream, "Queue closed");
    }
}

#[async_trait]
impl MessageSink for InMemoryQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<(u32, u64), QueueError> {
        let index = self.next_partition.fetch_add(1, Ordering::Relaxed) % self.partitions.len();
        let partition = u32::try_from(index).unwrap_or(0);
        let offset = self.publish_to(partition, payload)?;
        Ok((partition, offset))
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// One partition's ordered delivery.
#[derive(Debug, Clone)]
pub struct PartitionConsumer {
    stream: Arc<str>,
    partition: Arc<Partition>,
}

impl PartitionConsumer {
    /// Partition this consumer reads.
    #[must_use]
    pub fn partition(&self) -> u32 {
        self.partition.id
    }
}

#[async_trait]
impl MessageSource for PartitionConsumer {
    async fn next_message(&self) -> Result<Option<RawMessage>, QueueError> {
        loop {
            let notified = self.partition.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.partition.state.lock();
                if let Some((offset, payload)) = state.take_next() {
                    return Ok(Some(RawMessage::new(
                        Arc::clone(&self.stream),
                        self.partition.id,
                        offset,
                        payload,
                    )));
                }
                if state.closed && state.in_flight.is_none() && state.cursor >= state.end() {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn acknowledge(&self, message: &RawMessage) -> Result<(), QueueError> {
        let mut state = self.partition.state.lock();
        self.partition.check_in_flight(&state, message.offset())?;
        state.log.pop_front();
        state.committed += 1;
        state.in_flight = None;
        Ok(())
    }

    async fn redeliver(&self, message: &RawMessage) -> Result<(), QueueError> {
        {
            let mut state = self.partition.state.lock();
            self.partition.check_in_flight(&state, message.offset())?;
            state.cursor = message.offset();
            state.in_flight = None;
        }
        self.partition.notify.notify_waiters();
        Ok(())
    }
}
