use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

use super::{
    EventVerificationError, GatewayEvent, GatewayEventKind, GatewayIntent, IntentMetadata,
    PaymentGateway,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, matching Stripe's default tolerance.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
struct CreatePaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    id: Option<String>,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    metadata: StripeMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct StripeMetadata {
    purchase_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(api_base: &str, secret_key: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<GatewayIntent> {
        let amount = amount_minor.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[purchase_id]", metadata.purchase_id.as_str()),
            ("metadata[video_id]", metadata.video_id.as_str()),
            ("metadata[user_id]", metadata.user_id.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            // One gateway payment per purchase, even if this request is retried
            .header("Idempotency-Key", &metadata.purchase_id)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorResponse>(&text)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(text);
            return Err(AppError::Gateway(format!("Stripe API error ({}): {}", status, message)));
        }

        let intent: CreatePaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Stripe response: {}", e)))?;

        let client_secret = intent
            .client_secret
            .ok_or_else(|| AppError::Gateway("Stripe returned no client_secret".into()))?;

        Ok(GatewayIntent {
            id: intent.id,
            client_secret,
        })
    }

    fn verify_event(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> std::result::Result<GatewayEvent, EventVerificationError> {
        verify_signature(
            &self.webhook_secret,
            raw_body,
            signature_header,
            chrono::Utc::now().timestamp(),
        )?;
        parse_event(raw_body)
    }

    fn signature_header(&self) -> &'static str {
        STRIPE_SIGNATURE_HEADER
    }
}

/// Verify a `t=<unix>,v1=<hex hmac>` signature header over the raw payload.
///
/// The signed message is `"{t}.{payload}"`. Any `v1` entry may match (the
/// gateway sends several during secret rotation). Comparison is constant-time.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> std::result::Result<(), EventVerificationError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(EventVerificationError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(EventVerificationError::MalformedHeader);
    }
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| EventVerificationError::MalformedHeader)?;

    if ts.abs_diff(now) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(EventVerificationError::StaleTimestamp);
    }

    let expected = compute_signature(secret, timestamp, payload)
        .ok_or(EventVerificationError::InvalidSignature)?;
    let matched = signatures
        .iter()
        .any(|sig| bool::from(expected.as_bytes().ct_eq(sig.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(EventVerificationError::InvalidSignature)
    }
}

fn compute_signature(secret: &str, timestamp: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Build a signature header for `payload` (dev tooling and tests).
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let ts = timestamp.to_string();
    let signature = compute_signature(secret, &ts, payload).unwrap_or_default();
    format!("t={},v1={}", ts, signature)
}

/// Parse an already-authenticated event body.
pub fn parse_event(raw_body: &[u8]) -> std::result::Result<GatewayEvent, EventVerificationError> {
    let event: StripeWebhookEvent = serde_json::from_slice(raw_body)
        .map_err(|e| EventVerificationError::MalformedPayload(e.to_string()))?;

    let kind = GatewayEventKind::from_event_type(&event.event_type);
    let object = event.data.object;

    let is_payment_intent = object.object.as_deref().is_none_or(|o| o == "payment_intent");
    let payment_id = if is_payment_intent { object.id } else { None };

    if !matches!(kind, GatewayEventKind::Other(_)) && payment_id.is_none() {
        return Err(EventVerificationError::MalformedPayload(format!(
            "{} event without a payment id",
            event.event_type
        )));
    }

    Ok(GatewayEvent {
        id: event.id,
        kind,
        payment_id,
        purchase_id: object.metadata.purchase_id,
    })
}
