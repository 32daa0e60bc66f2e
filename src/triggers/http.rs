use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::server::AppState;

const MESSAGE_TYPE: &str = "message";
const APPLE_PLATFORM: &str = "apple";
const DEVICE_ID_LEN: usize = 64;

/// Request to push a "new message" alert to one device
#[derive(Debug, Deserialize)]
pub struct SendPushRequest {
    /// Must be "message"
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Must be "apple"
    pub platform: Option<String>,
    /// Device token as 64 hex digits
    #[serde(default)]
    pub device_id: String,
    /// Source channel; only the configured prefix is forwarded
    #[serde(default)]
    pub channel_name: String,
    /// Badge count shown on the app icon
    #[serde(default = "default_badge")]
    pub badge: u32,
    /// Seconds until the gateway may discard the notification, 0 for never
    #[serde(default)]
    pub expiry_seconds: u32,
}

fn default_badge() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct SendPushResponse {
    /// Whether the notification was queued for delivery
    pub accepted: bool,
    /// Set when the channel is not forwarded
    pub skipped: bool,
    pub timestamp: DateTime<Utc>,
}

impl SendPushResponse {
    fn accepted() -> Self {
        Self {
            accepted: true,
            skipped: false,
            timestamp: Utc::now(),
        }
    }

    fn skipped() -> Self {
        Self {
            accepted: false,
            skipped: true,
            timestamp: Utc::now(),
        }
    }
}

/// Validate a push request and hand it to the engine
#[tracing::instrument(name = "http.send_push", skip_all)]
pub async fn send_push(
    State(state): State<AppState>,
    Json(request): Json<SendPushRequest>,
) -> Result<Json<SendPushResponse>> {
    if request.kind.as_deref() != Some(MESSAGE_TYPE) {
        return Err(AppError::Validation(format!(
            "invalid message type: {}",
            request.kind.as_deref().unwrap_or("<missing>")
        )));
    }

    if request.platform.as_deref() != Some(APPLE_PLATFORM) {
        return Err(AppError::Validation(format!(
            "invalid platform: {}",
            request.platform.as_deref().unwrap_or("<missing>")
        )));
    }

    if request.device_id.len() != DEVICE_ID_LEN {
        return Err(AppError::Validation(format!(
            "device_id must be {} characters, got {}",
            DEVICE_ID_LEN,
            request.device_id.len()
        )));
    }

    let payload = &state.settings.payload;
    if !request.channel_name.starts_with(&payload.channel_prefix) {
        tracing::info!(channel = %request.channel_name, "Skipping channel");
        return Ok(Json(SendPushResponse::skipped()));
    }

    state.engine.submit(
        &request.device_id,
        &payload.alert_text,
        request.badge,
        request.expiry_seconds,
    )?;

    Ok(Json(SendPushResponse::accepted()))
}
