//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Pipeline**: Messages by stage and disposition, trades inserted,
//!   duplicate batches, dropped ticks, failed summary updates, redeliveries
//! - **Feed**: Frames received by type, reconnects, connection state
//! - **Queue**: Messages published per partition
//! - **Reads**: Query outcomes by endpoint
//! - **Latency**: Per-message processing time by execution strategy
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first.
///
/// # Panics
///
/// Panics if another global recorder was installed first.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Pipeline
    describe_counter!(
        "tick_pipeline_messages_processed_total",
        "Messages processed by final stage and ack disposition"
    );
    describe_counter!(
        "tick_pipeline_trades_inserted_total",
        "Trade records inserted"
    );
    describe_counter!(
        "tick_pipeline_duplicate_batches_total",
        "Batches rejected as already persisted"
    );
    describe_counter!(
        "tick_pipeline_ticks_dropped_total",
        "Individual ticks dropped during normalization"
    );
    describe_counter!(
        "tick_pipeline_aggregate_failures_total",
        "Symbol summary updates that failed"
    );
    describe_counter!(
        "tick_pipeline_redeliveries_total",
        "Messages handed back for redelivery"
    );

    // Feed
    describe_counter!(
        "tick_pipeline_feed_frames_total",
        "Frames received from the market data feed by type"
    );
    describe_counter!(
        "tick_pipeline_feed_reconnects_total",
        "Feed reconnection attempts"
    );
    describe_gauge!(
        "tick_pipeline_feed_connected",
        "1 while the feed WebSocket is connected"
    );

    // Queue
    describe_counter!(
        "tick_pipeline_queue_published_total",
        "Messages published to the queue by partition"
    );

    // Reads
    describe_counter!(
        "tick_pipeline_queries_total",
        "Read queries by endpoint and outcome"
    );

    // Latency
    describe_histogram!(
        "tick_pipeline_message_processing_seconds",
        "Time to process one message from parse to ack decision"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a processed message.
pub fn record_message_processed(stage: &'static str, disposition: &'static str) {
    counter!(
        "tick_pipeline_messages_processed_total",
        "stage" => stage,
        "disposition" => disposition
    )
    .increment(1);
}

/// Record inserted trade records.
pub fn record_trades_inserted(count: usize) {
    counter!("tick_pipeline_trades_inserted_total").increment(count as u64);
}

/// Record a batch rejected as a duplicate.
pub fn record_duplicate_batch() {
    counter!("tick_pipeline_duplicate_batches_total").increment(1);
}

/// Record ticks dropped during normalization.
pub fn record_ticks_dropped(count: usize) {
    if count > 0 {
        counter!("tick_pipeline_ticks_dropped_total").increment(count as u64);
    }
}

/// Record failed symbol summary updates.
pub fn record_aggregate_failures(count: usize) {
    counter!("tick_pipeline_aggregate_failures_total").increment(count as u64);
}

/// Record a redelivery on a partition.
pub fn record_redelivery(partition: u32) {
    counter!(
        "tick_pipeline_redeliveries_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record message processing duration.
pub fn record_processing_duration(strategy: &'static str, duration: Duration) {
    histogram!(
        "tick_pipeline_message_processing_seconds",
        "strategy" => strategy
    )
    .record(duration.as_secs_f64());
}

/// Record a frame received from the feed.
pub fn record_feed_frame(frame_type: &str) {
    counter!(
        "tick_pipeline_feed_frames_total",
        "type" => frame_type.to_string()
    )
    .increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_feed_reconnect() {
    counter!("tick_pipeline_feed_reconnects_total").increment(1);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!("tick_pipeline_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a message published to a partition.
pub fn record_published(partition: u32) {
    counter!(
        "tick_pipeline_queue_published_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record a read query.
pub fn record_query(endpoint: &'static str, success: bool) {
    counter!(
        "tick_pipeline_queries_total",
        "endpoint" => endpoint,
        "outcome" => if success { "ok" } else { "error" }
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_message_processed("aggregated", "acknowledge");
        record_trades_inserted(3);
        record_ticks_dropped(0);
        record_redelivery(1);
        record_query("symbols", false);
        set_feed_connected(true);
    }

    #[test]
    fn init_is_idempotent_and_renders() {
        let first = init_metrics();
        let second = init_metrics();
        record_duplicate_batch();

        assert!(get_metrics_handle().is_some());
        assert!(second.render().contains("tick_pipeline_duplicate_batches_total"));
        drop(first);
    }
}
