use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;

use crate::extractors::Json;
use crate::services::FulfillmentOutcome;
use crate::state::AppState;

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
    #[serde(flatten)]
    outcome: FulfillmentOutcome,
}

/// Gateway webhook. The body is taken as raw bytes because the signature is
/// computed over them.
///
/// Only a missing or invalid signature is answered with a non-2xx status;
/// everything else is acknowledged so the gateway stops redelivering.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let header_name = state.fulfillment.signature_header();
    let signature = match headers.get(header_name).and_then(|v| v.to_str().ok()) {
        Some(sig) => sig,
        None => {
            tracing::warn!("Webhook without {} header rejected", header_name);
            return (StatusCode::BAD_REQUEST, "Missing signature header").into_response();
        }
    };

    match state.fulfillment.receive(&body, signature).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(WebhookAck {
                received: true,
                outcome,
            }),
        )
            .into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "Invalid signature").into_response(),
    }
}
