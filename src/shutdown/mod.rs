//! Graceful shutdown handling for the relay.
//!
//! 1. Wait for Ctrl+C or SIGTERM
//! 2. Broadcast the shutdown signal so the HTTP server stops accepting work
//! 3. Give the delivery worker a bounded time to close its gateway session

use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Default time the worker gets to stop after the signal
pub const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve on Ctrl+C or SIGTERM, then broadcast shutdown.
pub async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}

/// Wait for the delivery worker to exit, aborting it after `limit`.
///
/// Returns true when the worker stopped on its own.
pub async fn await_worker(handle: JoinHandle<()>, limit: Duration) -> bool {
    let abort = handle.abort_handle();
    match timeout(limit, handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Delivery worker panicked");
            false
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = limit.as_secs(),
                "Delivery worker did not stop in time, aborting"
            );
            abort.abort();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_await_finished_worker() {
        let handle = tokio::spawn(async {});
        assert!(await_worker(handle, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_await_stuck_worker_aborts() {
        let handle = tokio::spawn(std::future::pending::<()>());
        assert!(!await_worker(handle, Duration::from_millis(20)).await);
    }
}
