mod dev;
mod payments;
mod videos;
mod webhooks;

pub use dev::*;
pub use payments::*;
pub use videos::*;
pub use webhooks::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::extractors::Json;
use crate::middleware::user_auth;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Routes that require a session token.
fn authenticated(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/payments/create-intent", post(create_intent))
        .route("/payments/verify", get(verify_purchase))
        .route("/payments/purchases", get(list_purchases))
        .route("/videos/{video_id}/access", get(check_access))
        .route(
            "/videos/{video_id}/stream-token",
            post(issue_stream_token).delete(revoke_stream_token),
        )
        .route("/videos/{video_id}/download-token", post(issue_download_token))
        .layer(middleware::from_fn_with_state(state, user_auth))
}

/// Routes authenticated by something other than a session (gateway signature,
/// access token) or not at all.
fn public() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/payments/webhook", post(receive_webhook))
        .route("/videos/{video_id}/stream", get(stream_video))
        .route("/downloads/{token}", get(redeem_download))
}

fn dev() -> Router<AppState> {
    Router::new()
        .route("/dev/videos", post(dev_create_video))
        .route("/dev/session", post(dev_create_session))
        .route("/dev/webhook-signature", post(dev_sign_webhook))
}

/// The full application router.
pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        .merge(authenticated(state.clone()))
        .merge(public());

    if state.dev.is_some() {
        tracing::warn!("Dev routes enabled under /dev");
        router = router.merge(dev());
    }

    router.with_state(state)
}
