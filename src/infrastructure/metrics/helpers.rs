use prometheus::{Encoder, TextEncoder};

use super::*;
use crate::gateway::GatewayStatus;

/// Render all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording submission metrics
pub struct SubmitMetrics;

impl SubmitMetrics {
    pub fn record_accepted() {
        SUBMISSIONS_ACCEPTED_TOTAL.inc();
    }

    pub fn record_rejected(reason: &str) {
        SUBMISSIONS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Helper struct for recording gateway metrics
pub struct GatewayMetrics;

impl GatewayMetrics {
    pub fn record_sent() {
        FRAMES_SENT_TOTAL.inc();
    }

    pub fn record_send_failure() {
        SEND_FAILURES_TOTAL.inc();
    }

    pub fn record_error_reply(status: GatewayStatus) {
        GATEWAY_ERRORS_TOTAL
            .with_label_values(&[status.as_label()])
            .inc();
    }

    pub fn record_malformed_reply() {
        MALFORMED_REPLIES_TOTAL.inc();
    }

    pub fn record_connect() {
        CONNECTIONS_OPENED_TOTAL.inc();
        GATEWAY_CONNECTION_STATUS.set(1);
    }

    pub fn record_connect_failure() {
        CONNECTION_FAILURES_TOTAL.inc();
        GATEWAY_CONNECTION_STATUS.set(0);
    }

    pub fn record_recycle() {
        CONNECTIONS_RECYCLED_TOTAL.inc();
    }

    pub fn set_connected(connected: bool) {
        GATEWAY_CONNECTION_STATUS.set(if connected { 1 } else { 0 });
    }
}

/// Helper struct for recording queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn set_sizes(pending: usize, history: usize) {
        QUEUE_PENDING.set(pending as i64);
        QUEUE_HISTORY.set(history as i64);
    }

    pub fn record_requeued(count: usize) {
        QUEUE_REQUEUED_TOTAL.inc_by(count as u64);
    }

    pub fn record_dropped() {
        QUEUE_DROPPED_TOTAL.inc();
    }

    pub fn record_pruned(count: usize) {
        QUEUE_PRUNED_TOTAL.inc_by(count as u64);
    }
}
