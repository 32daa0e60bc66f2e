use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::GatewayConfig;
use crate::gateway::{
    decode_error_reply, encode_frame, BackoffConfig, ConnectionManager, ExponentialBackoff,
    ERROR_REPLY_LEN,
};
use crate::metrics::{GatewayMetrics, QueueMetrics};
use crate::queue::{DeliveryQueue, PushRequest};

use super::engine::Submission;

/// Tunables for the delivery worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Transmission tries per notification before it is dropped
    pub max_attempts: u32,
    /// How long to wait for an error reply after each send
    pub read_timeout: Duration,
    pub priority: u8,
    pub backoff: BackoffConfig,
}

impl WorkerOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            read_timeout: config.read_timeout(),
            priority: config.priority,
            backoff: BackoffConfig {
                initial_delay_ms: config.reconnect_initial_delay_ms,
                max_delay_ms: config.reconnect_max_delay_ms,
                ..BackoffConfig::default()
            },
        }
    }
}

/// Snapshot of worker state published after every pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub pending: usize,
    pub history: usize,
    pub connected: bool,
    pub accepted: u64,
    pub sent: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub gateway_errors: u64,
    pub malformed_replies: u64,
    pub connects: u64,
}

/// Result of one send-and-check cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// Resend on a fresh connection within the same pass
    Retry,
    /// Sent and no error reply arrived in time
    Ok,
    /// The gateway rejected something or answered with garbage
    Failure,
}

/// Result of a drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainOutcome {
    /// `pending` is empty
    Drained,
    /// No connection could be opened; `pending` is left for a later pass
    ConnectFailed,
    /// Shutdown was signalled between cycles
    Interrupted,
}

enum WorkerEvent {
    Submission(Submission),
    Retry,
    Shutdown,
}

/// Single owner of the gateway connection and the delivery queue.
///
/// Submissions arrive over an unbounded channel. Every batch of submissions
/// triggers a drain pass that writes pending frames one at a time, checking
/// for an error reply after each write.
pub struct DeliveryWorker {
    connection: ConnectionManager,
    queue: DeliveryQueue,
    options: WorkerOptions,
    intake: mpsc::UnboundedReceiver<Submission>,
    shutdown: broadcast::Receiver<()>,
    stats_tx: watch::Sender<WorkerStats>,
    backoff: ExponentialBackoff,
    next_identifier: u32,
    totals: WorkerStats,
}

impl DeliveryWorker {
    pub fn new(
        connection: ConnectionManager,
        queue: DeliveryQueue,
        options: WorkerOptions,
        intake: mpsc::UnboundedReceiver<Submission>,
        shutdown: broadcast::Receiver<()>,
        stats_tx: watch::Sender<WorkerStats>,
    ) -> Self {
        let backoff = ExponentialBackoff::new(options.backoff.clone());
        Self {
            connection,
            queue,
            options,
            intake,
            shutdown,
            stats_tx,
            backoff,
            next_identifier: 1,
            totals: WorkerStats::default(),
        }
    }

    /// Run until shutdown is signalled or every submitter is gone
    pub async fn run(mut self) {
        tracing::info!(
            max_attempts = self.options.max_attempts,
            read_timeout_ms = self.options.read_timeout.as_millis() as u64,
            "Delivery worker started"
        );

        let mut retry_at: Option<tokio::time::Instant> = None;

        loop {
            let retry = async {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let event = tokio::select! {
                biased;
                _ = self.shutdown.recv() => WorkerEvent::Shutdown,
                submission = self.intake.recv() => match submission {
                    Some(submission) => WorkerEvent::Submission(submission),
                    None => WorkerEvent::Shutdown,
                },
                _ = retry => WorkerEvent::Retry,
            };

            match event {
                WorkerEvent::Shutdown => break,
                WorkerEvent::Submission(submission) => {
                    self.accept(submission);
                    while let Ok(submission) = self.intake.try_recv() {
                        self.accept(submission);
                    }
                }
                WorkerEvent::Retry => {
                    tracing::debug!(attempt = self.backoff.attempt(), "Retrying gateway connection");
                }
            }

            retry_at = match self.drain().await {
                DrainOutcome::Drained => {
                    self.backoff.reset();
                    None
                }
                DrainOutcome::ConnectFailed => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        delay_ms = delay.as_millis() as u64,
                        pending = self.queue.pending_len(),
                        "Gateway unreachable, delivery postponed"
                    );
                    Some(tokio::time::Instant::now() + delay)
                }
                DrainOutcome::Interrupted => break,
            };

            let pruned = self.queue.prune_history(Utc::now());
            if pruned > 0 {
                QueueMetrics::record_pruned(pruned);
                tracing::debug!(pruned, "Pruned stale history");
            }
            self.publish_stats();
        }

        self.connection.close().await;
        let (pending, history) = self.queue.clear();
        self.publish_stats();
        tracing::info!(
            discarded_pending = pending,
            discarded_history = history,
            "Delivery worker stopped"
        );
    }

    /// Encode a submission with the next identifier and queue it
    pub(crate) fn accept(&mut self, submission: Submission) {
        let identifier = self.next_identifier;
        match encode_frame(
            &submission.token,
            &submission.payload,
            identifier,
            submission.expiration,
            self.options.priority,
        ) {
            Ok(frame) => {
                self.next_identifier = self.next_identifier.checked_add(1).unwrap_or(1);
                self.totals.accepted += 1;
                tracing::debug!(identifier, frame_len = frame.len(), "Notification queued");
                self.queue.enqueue(PushRequest::new(identifier, frame));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode notification frame");
            }
        }
    }

    /// Write pending frames until the queue is empty, no connection can be
    /// opened, or shutdown is signalled.
    #[tracing::instrument(name = "worker.drain", skip(self), fields(pending = self.queue.pending_len()))]
    pub(crate) async fn drain(&mut self) -> DrainOutcome {
        self.connection.recycle_if_stale(Instant::now()).await;

        while let Some((identifier, attempts)) =
            self.queue.peek_head().map(|r| (r.identifier, r.attempts))
        {
            if self.shutdown_requested() {
                tracing::info!(
                    pending = self.queue.pending_len(),
                    "Shutdown requested, stopping drain pass"
                );
                return DrainOutcome::Interrupted;
            }

            if !self.connection.is_connected() {
                if self.connection.connect().await.is_err() {
                    return DrainOutcome::ConnectFailed;
                }
                self.totals.connects += 1;
            }

            if attempts >= self.options.max_attempts {
                self.queue.drop_head();
                self.totals.dropped += 1;
                QueueMetrics::record_dropped();
                tracing::error!(identifier, attempts, "Permanent failure, dropping notification");
                continue;
            }

            // Replies can only be matched against history written since the
            // counter last wrapped, so a wrap starts a new connection.
            if self
                .queue
                .last_sent_identifier()
                .is_some_and(|last| last >= identifier)
            {
                let forgotten = self.queue.forget_history();
                self.connection.close().await;
                tracing::info!(
                    identifier,
                    forgotten,
                    "Identifier sequence wrapped, starting a new connection"
                );
                continue;
            }

            // A sent request has already left `pending` through commit(), so
            // nothing is removed here whatever a requeue put at the head.
            let outcome = self.send_and_check(identifier).await;
            tracing::debug!(identifier, ?outcome, "Send cycle finished");
        }

        DrainOutcome::Drained
    }

    /// Write the head request and look for an error reply
    async fn send_and_check(&mut self, identifier: u32) -> CycleOutcome {
        let Some(request) = self.queue.head_mut() else {
            return CycleOutcome::Ok;
        };
        request.attempts += 1;
        let attempts = request.attempts;
        let frame = request.frame.clone();

        if let Err(e) = self.connection.send(&frame).await {
            GatewayMetrics::record_send_failure();
            tracing::warn!(identifier, attempts, error = %e, "Failed to write frame");
            return CycleOutcome::Retry;
        }

        self.queue.commit(identifier);
        self.totals.sent += 1;
        GatewayMetrics::record_sent();

        match self
            .connection
            .receive(ERROR_REPLY_LEN, self.options.read_timeout)
            .await
        {
            // No news is good news
            Ok(None) => CycleOutcome::Ok,
            Ok(Some(raw)) => self.handle_reply(&raw).await,
            Err(e) => {
                tracing::warn!(identifier, error = %e, "Gateway connection lost after send");
                CycleOutcome::Ok
            }
        }
    }

    async fn handle_reply(&mut self, raw: &[u8]) -> CycleOutcome {
        let reply = match decode_error_reply(raw) {
            Ok(reply) => reply,
            Err(e) => {
                self.connection.close().await;
                self.totals.malformed_replies += 1;
                GatewayMetrics::record_malformed_reply();
                tracing::error!(error = %e, raw = %hex::encode(raw), "Unexpected reply from gateway");
                return CycleOutcome::Failure;
            }
        };

        let requeued = self.queue.requeue_after(reply.identifier);
        // The gateway drops the connection after any error reply
        self.connection.close().await;

        self.totals.gateway_errors += 1;
        self.totals.requeued += requeued as u64;
        GatewayMetrics::record_error_reply(reply.status);
        QueueMetrics::record_requeued(requeued);

        if reply.status.is_retryable() {
            tracing::warn!(
                identifier = reply.identifier,
                status = reply.status.code(),
                reason = reply.status.reason(),
                requeued,
                "Gateway closed the connection, resending on a new one"
            );
            CycleOutcome::Retry
        } else {
            tracing::error!(
                identifier = reply.identifier,
                status = reply.status.code(),
                reason = reply.status.reason(),
                requeued,
                "Gateway rejected notification"
            );
            CycleOutcome::Failure
        }
    }

    /// Consumes a pending shutdown signal. A closed channel counts as one.
    fn shutdown_requested(&mut self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    fn publish_stats(&mut self) {
        self.totals.pending = self.queue.pending_len();
        self.totals.history = self.queue.history_len();
        self.totals.connected = self.connection.is_connected();

        QueueMetrics::set_sizes(self.totals.pending, self.totals.history);
        GatewayMetrics::set_connected(self.totals.connected);
        self.stats_tx.send_replace(self.totals.clone());
    }
}
