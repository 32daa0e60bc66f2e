use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::gateway::{decode_token, ConnectionManager, Connector, DeviceToken, TokenError, MAX_PAYLOAD_LEN};
use crate::metrics::SubmitMetrics;
use crate::queue::DeliveryQueue;

use super::payload::{PayloadTemplate, TemplateError};
use super::worker::{DeliveryWorker, WorkerOptions, WorkerStats};

/// Errors returned to callers of [`PushEngine::submit`]
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid device token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("invalid payload: {0}")]
    Payload(#[from] TemplateError),

    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("delivery worker is not running")]
    Stopped,
}

impl SubmitError {
    /// Short label for metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid_token",
            Self::Payload(_) => "invalid_payload",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Stopped => "stopped",
        }
    }
}

/// A validated notification on its way to the worker.
///
/// The worker assigns the identifier, so identifiers follow channel order.
#[derive(Debug, Clone)]
pub struct Submission {
    pub token: DeviceToken,
    pub payload: Bytes,
    /// Absolute epoch seconds, zero for no expiry
    pub expiration: u32,
}

/// Handle for submitting notifications to the delivery worker.
///
/// Cheap to clone. Submission is non-blocking: validation and payload
/// rendering happen on the caller, delivery on the worker task.
#[derive(Clone)]
pub struct PushEngine {
    intake: mpsc::UnboundedSender<Submission>,
    template: Arc<PayloadTemplate>,
    stats: watch::Receiver<WorkerStats>,
}

impl PushEngine {
    /// Spawn the delivery worker and return a submission handle.
    ///
    /// The worker stops when `shutdown` fires or every handle is dropped.
    pub fn start(
        config: &GatewayConfig,
        template: PayloadTemplate,
        connector: Arc<dyn Connector>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(WorkerStats::default());

        let worker = DeliveryWorker::new(
            ConnectionManager::new(connector, config.socket_max_age(), config.read_timeout()),
            DeliveryQueue::new(config.history_max_age()),
            WorkerOptions::from_config(config),
            intake_rx,
            shutdown,
            stats_tx,
        );
        let handle = tokio::spawn(worker.run());

        let engine = Self {
            intake: intake_tx,
            template: Arc::new(template),
            stats: stats_rx,
        };
        (engine, handle)
    }

    /// Queue a notification for delivery.
    ///
    /// `device_token_hex` must be 64 hex digits. `expiry_seconds` is relative
    /// to now; zero means the notification never expires.
    #[tracing::instrument(name = "engine.submit", skip_all, fields(badge = badge, expiry_seconds = expiry_seconds))]
    pub fn submit(
        &self,
        device_token_hex: &str,
        message: &str,
        badge: u32,
        expiry_seconds: u32,
    ) -> Result<(), SubmitError> {
        let result = self
            .prepare(device_token_hex, message, badge, expiry_seconds)
            .and_then(|submission| {
                self.intake
                    .send(submission)
                    .map_err(|_| SubmitError::Stopped)
            });

        match &result {
            Ok(()) => SubmitMetrics::record_accepted(),
            Err(e) => {
                SubmitMetrics::record_rejected(e.as_label());
                tracing::warn!(error = %e, "Notification rejected");
            }
        }
        result
    }

    fn prepare(
        &self,
        device_token_hex: &str,
        message: &str,
        badge: u32,
        expiry_seconds: u32,
    ) -> Result<Submission, SubmitError> {
        let token = decode_token(device_token_hex)?;

        let payload = self.template.render(message, badge)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(SubmitError::PayloadTooLarge(payload.len()));
        }

        let expiration = if expiry_seconds == 0 {
            0
        } else {
            let at = Utc::now().timestamp() + i64::from(expiry_seconds);
            u32::try_from(at).unwrap_or(u32::MAX)
        };

        Ok(Submission {
            token,
            payload: Bytes::from(payload),
            expiration,
        })
    }

    /// Latest worker snapshot
    pub fn stats(&self) -> WorkerStats {
        self.stats.borrow().clone()
    }

    /// Watch worker snapshots as they are published
    pub fn subscribe_stats(&self) -> watch::Receiver<WorkerStats> {
        self.stats.clone()
    }

    /// Whether the worker task is still accepting submissions
    pub fn is_running(&self) -> bool {
        !self.intake.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::testing::ScriptedConnector;

    const TEMPLATE: &str = r#"{"aps":{"alert":"{{alert}}","badge":{{badge}}}}"#;
    const HEX_TOKEN: &str = "8f1e2d3c4b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0";

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            read_timeout_ms: 20,
            ..GatewayConfig::default()
        }
    }

    fn engine(connector: Arc<ScriptedConnector>) -> (PushEngine, JoinHandle<()>, broadcast::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let template = PayloadTemplate::new(TEMPLATE).unwrap();
        let (engine, handle) = PushEngine::start(&test_config(), template, connector, shutdown_rx);
        (engine, handle, shutdown_tx)
    }

    async fn wait_for(engine: &PushEngine, check: impl Fn(&WorkerStats) -> bool) -> WorkerStats {
        let mut rx = engine.subscribe_stats();
        let stats = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| check(s)))
            .await
            .expect("worker did not reach expected state")
            .unwrap()
            .clone();
        stats
    }

    #[tokio::test]
    async fn test_short_token_rejected_without_connecting() {
        let connector = ScriptedConnector::new();
        let (engine, _handle, _shutdown) = engine(connector.clone());

        let err = engine.submit("0123456789", "hello", 1, 0).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidToken(_)));
        assert_eq!(err.as_label(), "invalid_token");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.connects(), 0);
        assert_eq!(engine.stats().accepted, 0);
    }

    #[tokio::test]
    async fn test_non_hex_token_rejected() {
        let (engine, _handle, _shutdown) = engine(ScriptedConnector::new());
        let token = "zz".repeat(32);

        let err = engine.submit(&token, "hello", 1, 0).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidToken(TokenError::InvalidHex(_))));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (engine, _handle, _shutdown) = engine(ScriptedConnector::new());
        let message = "x".repeat(MAX_PAYLOAD_LEN);

        let err = engine.submit(HEX_TOKEN, &message, 1, 0).unwrap_err();
        assert!(matches!(err, SubmitError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn test_submit_is_delivered() {
        let connector = ScriptedConnector::new();
        let (engine, _handle, _shutdown) = engine(connector.clone());

        engine.submit(HEX_TOKEN, "hello", 2, 0).unwrap();

        let stats = wait_for(&engine, |s| s.sent == 1).await;
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.history, 1);
        assert!(stats.connected);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let (engine, handle, shutdown) = engine(ScriptedConnector::new());

        shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(!engine.is_running());
        let err = engine.submit(HEX_TOKEN, "hello", 1, 0).unwrap_err();
        assert!(matches!(err, SubmitError::Stopped));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_keeps_requests_pending() {
        let connector = ScriptedConnector::new();
        connector.set_refuse(true);
        let (engine, _handle, _shutdown) = engine(connector.clone());

        engine.submit(HEX_TOKEN, "one", 1, 0).unwrap();
        engine.submit(HEX_TOKEN, "two", 1, 0).unwrap();

        let stats = wait_for(&engine, |s| s.accepted == 2).await;
        assert_eq!(stats.pending, 2);
        assert!(!stats.connected);

        // The worker keeps retrying on its own once the gateway comes back
        connector.set_refuse(false);
        let stats = wait_for(&engine, |s| s.sent == 2).await;
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.history, 2);
    }
}
