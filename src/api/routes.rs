use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};
use crate::triggers::send_push;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Ingestion
        .nest(
            "/api/v1",
            Router::new()
                .route("/send_push", post(send_push))
                .route_layer(from_fn_with_state(state, api_key_auth)),
        )
}
