use axum::{
    Extension,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::middleware::AuthUser;
use crate::services::{AccessDecision, DownloadAccess, IssuedToken, StreamAccess};
use crate::state::AppState;

pub async fn check_access(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(video_id): Path<String>,
) -> Result<Json<AccessDecision>> {
    let decision = state.entitlements.check_access(&user.user_id, &video_id).await?;
    Ok(Json(decision))
}

pub async fn issue_stream_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(video_id): Path<String>,
) -> Result<Json<IssuedToken>> {
    let grant = state
        .entitlements
        .check_access(&user.user_id, &video_id)
        .await?
        .require_grant()?;

    let issued = state.tokens.issue_streaming_token(&grant).await?;
    Ok(Json(issued))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

/// The token names its own video; the path segment is not consulted.
pub async fn revoke_stream_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>> {
    let revoked = state.tokens.revoke(&input.token, &user.user_id).await?;
    Ok(Json(RevokeResponse { revoked }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: String,
}

/// Playback gate. Signing the CDN URL happens downstream of this grant.
pub async fn stream_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Json<StreamAccess>> {
    let access = state.tokens.validate_streaming_token(&query.token).await?;
    if access.video_id != video_id {
        return Err(AppError::VideoAccess("Token was issued for another video".into()));
    }
    Ok(Json(access))
}

pub async fn issue_download_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(video_id): Path<String>,
) -> Result<Json<IssuedToken>> {
    let grant = state
        .entitlements
        .check_access(&user.user_id, &video_id)
        .await?
        .require_grant()?;

    let issued = state.tokens.issue_download_token(&grant).await?;
    Ok(Json(issued))
}

pub async fn redeem_download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<DownloadAccess>> {
    let access = state.tokens.redeem_download_token(&token).await?;
    tracing::info!("Download token redeemed for video {}", access.video_id);
    Ok(Json(access))
}
