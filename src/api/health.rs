//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::notification::WorkerStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub gateway: GatewayHealthResponse,
    pub queue: QueueHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct GatewayHealthResponse {
    pub host: String,
    pub port: u16,
    pub sandbox: bool,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub pending: usize,
    pub history: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub worker_running: bool,
    #[serde(flatten)]
    pub worker: WorkerStats,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let worker = state.engine.stats();
    let gateway = &state.settings.gateway;

    // An idle worker has no open connection, which is not a fault
    let status = if state.engine.is_running() {
        "healthy"
    } else {
        "stopped"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        gateway: GatewayHealthResponse {
            host: gateway.host().to_string(),
            port: gateway.port,
            sandbox: gateway.use_sandbox,
            connected: worker.connected,
        },
        queue: QueueHealthResponse {
            pending: worker.pending,
            history: worker.history,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        worker_running: state.engine.is_running(),
        worker: state.engine.stats(),
    })
}
