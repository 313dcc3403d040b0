//! Pipeline Worker
//!
//! The consume loop for one partition. Messages are processed one at a
//! time, fully, in delivery order. A message marked for retry is handed
//! back to the head of its partition and the loop backs off before pulling
//! it again, so no later message of the partition overtakes it.
//!
//! Shutdown is observed only between messages.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, BackoffPolicy};
use super::coordinator::{Disposition, PipelineCoordinator};
use crate::application::ports::{MessageSource, QueueError, TradeStore};
use crate::infrastructure::metrics;

/// Counters accumulated by a worker over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Processing attempts, including retries.
    pub processed: u64,
    /// Messages acknowledged.
    pub acknowledged: u64,
    /// Messages handed back for redelivery.
    pub retried: u64,
}

/// Worker failure.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The queue rejected a fetch, acknowledge, or redeliver.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// A message kept failing past the configured retry limit.
    #[error("giving up on partition {partition} offset {offset} after {attempts} attempts")]
    RetriesExhausted {
        /// Partition of the stuck message.
        partition: u32,
        /// Offset of the stuck message.
        offset: u64,
        /// Attempts made.
        attempts: u32,
    },
}

/// Single-partition consume loop.
pub struct PipelineWorker<S, M>
where
    S: TradeStore,
    M: MessageSource,
{
    coordinator: Arc<PipelineCoordinator<S>>,
    source: M,
    retry: BackoffConfig,
    cancel: CancellationToken,
}

impl<S, M> PipelineWorker<S, M>
where
    S: TradeStore,
    M: MessageSource,
{
    /// Create a worker.
    #[must_use]
    pub const fn new(
        coordinator: Arc<PipelineCoordinator<S>>,
        source: M,
        retry: BackoffConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            source,
            retry,
            cancel,
        }
    }

    /// Run until cancelled or the partition is closed and drained.
    pub async fn run(self) -> Result<WorkerStats, WorkerError> {
        let mut policy = BackoffPolicy::new(self.retry.clone());
        let mut stats = WorkerStats::default();

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!("Pipeline worker cancelled");
                    break;
                }
                next = self.source.next_message() => next?,
            };

            let Some(message) = next else {
                tracing::info!("Partition closed and drained");
                break;
            };

            let report = self.coordinator.process(&message).await;
            stats.processed += 1;

            match report.disposition {
                Disposition::Acknowledge => {
                    self.source.acknowledge(&message).await?;
                    stats.acknowledged += 1;
                    policy.reset();
                }
                Disposition::Retry => {
                    self.source.redeliver(&message).await?;
                    stats.retried += 1;
                    metrics::record_redelivery(message.partition());

                    let Some(delay) = policy.next_delay() else {
                        return Err(WorkerError::RetriesExhausted {
                            partition: message.partition(),
                            offset: message.offset(),
                            attempts: policy.attempt_count(),
                        });
                    };

                    tracing::warn!(
                        partition = message.partition(),
                        offset = message.offset(),
                        attempt = policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Message will be redelivered"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Pipeline worker cancelled during retry backoff");
                            break;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!(
            processed = stats.processed,
            acknowledged = stats.acknowledged,
            retried = stats.retried,
            "Pipeline worker stopped"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::services::coordinator::ExecutionStrategy;
    use crate::domain::message::RawMessage;
    use crate::infrastructure::persistence::InMemoryTradeStore;

    /// Scripted source that records acknowledgments and redeliveries.
    #[derive(Default)]
    struct ScriptedSource {
        pending: Mutex<VecDeque<RawMessage>>,
        acked: Mutex<Vec<u64>>,
        redelivered: Mutex<Vec<u64>>,
    }

    impl ScriptedSource {
        fn with(messages: Vec<RawMessage>) -> Self {
            Self {
                pending: Mutex::new(messages.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MessageSource for Arc<ScriptedSource> {
        async fn next_message(&self) -> Result<Option<RawMessage>, QueueError> {
            Ok(self.pending.lock().pop_front())
        }

        async fn acknowledge(&self, message: &RawMessage) -> Result<(), QueueError> {
            self.acked.lock().push(message.offset());
            Ok(())
        }

        async fn redeliver(&self, message: &RawMessage) -> Result<(), QueueError> {
            self.redelivered.lock().push(message.offset());
            self.pending.lock().push_front(message.clone());
            Ok(())
        }
    }

    fn trade_message(offset: u64) -> RawMessage {
        let payload = format!(
            r#"{{"type":"trade","data":[{{"s":"AAPL","p":1,"v":1,"t":{}}}]}}"#,
            1000 + offset
        );
        RawMessage::new("t", 0, offset, payload.into_bytes())
    }

    fn fast_retry(max_attempts: u32) -> BackoffConfig {
        BackoffConfig::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            2.0,
            0.0,
            max_attempts,
        )
    }

    #[tokio::test]
    async fn acknowledges_in_delivery_order_until_drained() {
        let store = Arc::new(InMemoryTradeStore::new());
        let coordinator = Arc::new(PipelineCoordinator::new(
            Arc::clone(&store),
            ExecutionStrategy::Independent,
            Duration::from_secs(1),
        ));
        let source = Arc::new(ScriptedSource::with(vec![
            trade_message(0),
            RawMessage::new("t", 0, 1, br#"{"type":"ping"}"#.to_vec()),
            trade_message(2),
        ]));

        let stats = PipelineWorker::new(
            coordinator,
            Arc::clone(&source),
            fast_retry(0),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.acknowledged, 3);
        assert_eq!(stats.retried, 0);
        assert_eq!(*source.acked.lock(), vec![0, 1, 2]);
        assert_eq!(store.trade_count(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_retry_limit() {
        let store = Arc::new(InMemoryTradeStore::new());
        store.set_unavailable(true);
        let coordinator = Arc::new(PipelineCoordinator::new(
            Arc::clone(&store),
            ExecutionStrategy::Atomic,
            Duration::from_secs(1),
        ));
        let source = Arc::new(ScriptedSource::with(vec![trade_message(5), trade_message(6)]));

        let err = PipelineWorker::new(
            coordinator,
            Arc::clone(&source),
            fast_retry(2),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            WorkerError::RetriesExhausted { offset: 5, attempts: 2, .. }
        ));
        // The failing message was never overtaken by offset 6.
        assert!(source.acked.lock().is_empty());
        assert!(source.redelivered.lock().iter().all(|o| *o == 5));
    }

    #[tokio::test]
    async fn cancelled_worker_stops_without_processing() {
        let store = Arc::new(InMemoryTradeStore::new());
        let coordinator = Arc::new(PipelineCoordinator::new(
            Arc::clone(&store),
            ExecutionStrategy::Independent,
            Duration::from_secs(1),
        ));
        let source = Arc::new(ScriptedSource::with(vec![trade_message(0)]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = PipelineWorker::new(coordinator, Arc::clone(&source), fast_retry(0), cancel)
            .run()
            .await
            .unwrap();

        assert_eq!(stats, WorkerStats::default());
        assert_eq!(store.trade_count(), 0);
    }
}
