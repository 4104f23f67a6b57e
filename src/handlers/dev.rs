use std::time::Duration;

use axum::{body::Bytes, extract::State};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateVideo, Video};
use crate::payments::sign_payload;
use crate::state::{AppState, DevTools};

const DEV_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

fn dev_tools(state: &AppState) -> Result<&DevTools> {
    state
        .dev
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Not found".into()))
}

pub async fn dev_create_video(
    State(state): State<AppState>,
    Json(input): Json<CreateVideo>,
) -> Result<Json<Video>> {
    dev_tools(&state)?;
    if input.owner_id.trim().is_empty() || input.title.trim().is_empty() {
        return Err(AppError::Validation("ownerId and title are required".into()));
    }

    let video = state.ledger.register_video(&input)?;
    tracing::info!("DEV: Registered video {} owned by {}", video.id, video.owner_id);
    Ok(Json(video))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct DevSession {
    pub token: String,
}

pub async fn dev_create_session(
    State(state): State<AppState>,
    Json(input): Json<DevSessionRequest>,
) -> Result<Json<DevSession>> {
    dev_tools(&state)?;
    let token = state.sessions.issue(&input.user_id, DEV_SESSION_TTL)?;
    Ok(Json(DevSession { token }))
}

#[derive(Debug, Serialize)]
pub struct DevSignature {
    /// Value for the gateway signature header
    pub signature: String,
}

/// Sign an arbitrary payload the way the gateway would, for replaying
/// webhooks by hand.
pub async fn dev_sign_webhook(State(state): State<AppState>, body: Bytes) -> Result<Json<DevSignature>> {
    let tools = dev_tools(&state)?;
    let signature = sign_payload(&tools.webhook_secret, Utc::now().timestamp(), &body);
    Ok(Json(DevSignature { signature }))
}
