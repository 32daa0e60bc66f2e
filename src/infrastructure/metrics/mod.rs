//! Prometheus metrics for the push relay.
//!
//! - Submission metrics (accepted, rejected by reason)
//! - Gateway metrics (frames sent, error replies by status, connections)
//! - Queue metrics (pending and history sizes, requeued and dropped requests)

mod helpers;

pub use helpers::{encode_metrics, GatewayMetrics, QueueMetrics, SubmitMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Submission Metrics
    // ============================================================================

    /// Notifications accepted for delivery
    pub static ref SUBMISSIONS_ACCEPTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_submissions_accepted_total", METRIC_PREFIX),
        "Total notifications accepted for delivery"
    ).unwrap();

    /// Notifications rejected at submission
    pub static ref SUBMISSIONS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_submissions_rejected_total", METRIC_PREFIX),
        "Total notifications rejected at submission",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Gateway Metrics
    // ============================================================================

    /// Frames written to the gateway
    pub static ref FRAMES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_sent_total", METRIC_PREFIX),
        "Total notification frames written to the gateway"
    ).unwrap();

    /// Frame writes that failed
    pub static ref SEND_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_failures_total", METRIC_PREFIX),
        "Total frame writes that failed"
    ).unwrap();

    /// Error replies received from the gateway
    pub static ref GATEWAY_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_gateway_errors_total", METRIC_PREFIX),
        "Total error replies received from the gateway",
        &["status"]
    ).unwrap();

    /// Replies that could not be decoded
    pub static ref MALFORMED_REPLIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_malformed_replies_total", METRIC_PREFIX),
        "Total unexpected or truncated gateway replies"
    ).unwrap();

    /// Gateway connections opened
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total gateway connections opened"
    ).unwrap();

    /// Gateway connection attempts that failed
    pub static ref CONNECTION_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connection_failures_total", METRIC_PREFIX),
        "Total failed gateway connection attempts"
    ).unwrap();

    /// Idle connections closed proactively
    pub static ref CONNECTIONS_RECYCLED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_recycled_total", METRIC_PREFIX),
        "Total idle gateway connections recycled"
    ).unwrap();

    /// Gateway connection status (1 = connected, 0 = disconnected)
    pub static ref GATEWAY_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_gateway_connection_status", METRIC_PREFIX),
        "Gateway connection status (1=connected, 0=disconnected)"
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Requests waiting to be sent
    pub static ref QUEUE_PENDING: IntGauge = register_int_gauge!(
        format!("{}_queue_pending", METRIC_PREFIX),
        "Notifications waiting to be sent"
    ).unwrap();

    /// Sent requests retained for replay
    pub static ref QUEUE_HISTORY: IntGauge = register_int_gauge!(
        format!("{}_queue_history", METRIC_PREFIX),
        "Sent notifications retained for replay"
    ).unwrap();

    /// Requests moved back to pending after an error reply
    pub static ref QUEUE_REQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_requeued_total", METRIC_PREFIX),
        "Total notifications requeued after a gateway error reply"
    ).unwrap();

    /// Requests dropped after exhausting their attempts
    pub static ref QUEUE_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_dropped_total", METRIC_PREFIX),
        "Total notifications dropped after exhausting attempts"
    ).unwrap();

    /// History entries pruned by age
    pub static ref QUEUE_PRUNED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_pruned_total", METRIC_PREFIX),
        "Total history entries pruned by age"
    ).unwrap();
}
