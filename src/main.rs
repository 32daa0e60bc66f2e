use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use push_relay_service::config::Settings;
use push_relay_service::gateway::TlsConnector;
use push_relay_service::notification::{PayloadTemplate, PushEngine};
use push_relay_service::server::{create_app, AppState};
use push_relay_service::shutdown::{await_worker, shutdown_signal_handler, WORKER_STOP_TIMEOUT};
use push_relay_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(
        gateway = %settings.gateway.host(),
        port = settings.gateway.port,
        sandbox = settings.gateway.use_sandbox,
        "Configuration loaded"
    );

    let template = PayloadTemplate::new(settings.payload.template.clone())
        .context("invalid payload template")?;
    let connector = TlsConnector::from_config(&settings.gateway)
        .context("failed to set up gateway TLS")?;

    // Start the delivery worker
    let (shutdown_tx, _) = broadcast::channel(1);
    let (engine, worker_handle) = PushEngine::start(
        &settings.gateway,
        template,
        Arc::new(connector),
        shutdown_tx.subscribe(),
    );
    tracing::info!("Delivery worker started");

    let state = AppState::new(settings.clone(), engine);
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx.clone()))
        .await?;

    // The server may also stop on its own; make sure the worker hears about it
    let _ = shutdown_tx.send(());

    tracing::info!("Waiting for delivery worker to finish...");
    await_worker(worker_handle, WORKER_STOP_TIMEOUT).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
