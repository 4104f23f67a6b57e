//! Shared fixtures: a file-backed ledger, the in-memory store and a fake
//! gateway that signs and verifies webhooks exactly like the real one.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{Router, body::Body, http::Request, response::Response};
use serde_json::{Value, json};
use tempfile::TempDir;

pub use paystream::config::{Config, Policy};
pub use paystream::error::{AppError, PaymentError};
pub use paystream::jwt::{SessionVerifier, StreamSigner};
pub use paystream::models::{CreateVideo, PurchaseStatus, Video};
pub use paystream::payments::{
    EventVerificationError, GatewayEvent, GatewayIntent, IntentMetadata, PaymentGateway,
    STRIPE_SIGNATURE_HEADER, parse_event, sign_payload, verify_signature,
};
pub use paystream::db::PurchaseLedger;
pub use paystream::services::{FulfillmentOutcome, WebhookFulfillmentService};
pub use paystream::state::AppState;
pub use paystream::store::{KeyValueStore, MemoryStore};

pub const WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const SESSION_SECRET: &str = "test-session-secret";

/// Gateway double: hands out sequential payment ids and can be told to fail.
#[derive(Default)]
pub struct FakeGateway {
    created: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicUsize,
    last_metadata: std::sync::Mutex<Option<IntentMetadata>>,
    early_webhook: std::sync::Mutex<Option<Arc<WebhookFulfillmentService>>>,
    early_outcome: std::sync::Mutex<Option<FulfillmentOutcome>>,
    foreign_binding: std::sync::Mutex<Option<(PurchaseLedger, String)>>,
}

impl FakeGateway {
    pub fn intents_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn last_metadata(&self) -> Option<IntentMetadata> {
        self.last_metadata.lock().unwrap().clone()
    }

    /// The next intent's `payment_intent.succeeded` is delivered before
    /// `create_intent` returns, as a gateway racing the response would.
    pub fn succeed_before_returning(&self, fulfillment: Arc<WebhookFulfillmentService>) {
        *self.early_webhook.lock().unwrap() = Some(fulfillment);
    }

    pub fn early_outcome(&self) -> Option<FulfillmentOutcome> {
        self.early_outcome.lock().unwrap().clone()
    }

    /// The next intent's purchase gets bound to `payment_id` before
    /// `create_intent` returns.
    pub fn bind_elsewhere_before_returning(&self, ledger: PurchaseLedger, payment_id: &str) {
        *self.foreign_binding.lock().unwrap() = Some((ledger, payment_id.to_string()));
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        metadata: &IntentMetadata,
    ) -> paystream::error::Result<GatewayIntent> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Gateway("gateway unavailable".into()));
        }

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_metadata.lock().unwrap() = Some(metadata.clone());
        let id = format!("pi_test_{}", n);

        let foreign = self.foreign_binding.lock().unwrap().take();
        if let Some((ledger, payment_id)) = foreign {
            assert!(ledger
                .set_gateway_payment_id(&metadata.purchase_id, &payment_id)
                .unwrap());
        }

        let early = self.early_webhook.lock().unwrap().take();
        if let Some(fulfillment) = early {
            let payload = event_payload(
                "evt_early",
                "payment_intent.succeeded",
                &id,
                Some(&metadata.purchase_id),
            );
            let outcome = fulfillment.receive(&payload, &sign_now(&payload)).await.unwrap();
            *self.early_outcome.lock().unwrap() = Some(outcome);
        }

        Ok(GatewayIntent {
            client_secret: format!("{}_secret_abc", id),
            id,
        })
    }

    fn verify_event(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<GatewayEvent, EventVerificationError> {
        verify_signature(
            WEBHOOK_SECRET,
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

pub struct TestEnv {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub sessions: SessionVerifier,
    _dir: TempDir,
}

pub fn test_config(policy: Policy) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: String::new(),
        redis_url: None,
        dev_mode: true,
        currency: "usd".into(),
        stripe_secret_key: Some("sk_test_abc".into()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        stripe_api_base: "http://localhost:0".into(),
        session_secret: Some(SESSION_SECRET.into()),
        stream_signing_key: Some(hex::encode([42u8; 32])),
        policy,
    }
}

/// Rate limiting off; everything else at defaults.
pub fn test_policy() -> Policy {
    Policy {
        intent_rate_limit: 0,
        ..Policy::default()
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_policy(test_policy())
    }

    pub fn with_policy(policy: Policy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paystream.db");
        let pool = paystream::db::create_pool(path.to_str().unwrap(), 16).unwrap();

        let mut config = test_config(policy);
        config.database_path = path.to_string_lossy().into_owned();

        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let sessions = SessionVerifier::new(SESSION_SECRET.as_bytes());
        let signer = StreamSigner::from_seed(&[42u8; 32]).unwrap();

        let state = AppState::build(
            &config,
            pool,
            store.clone(),
            gateway.clone(),
            sessions.clone(),
            signer,
        );

        Self {
            state,
            store,
            gateway,
            sessions,
            _dir: dir,
        }
    }

    pub fn app(&self) -> Router {
        paystream::handlers::app(self.state.clone())
    }

    pub fn video(&self, owner_id: &str, price_cents: Option<i64>) -> Video {
        self.state
            .ledger
            .register_video(&CreateVideo {
                owner_id: owner_id.into(),
                title: "Test video".into(),
                price_cents,
                currency: None,
            })
            .unwrap()
    }

    pub fn bearer(&self, user_id: &str) -> String {
        let token = self
            .sessions
            .issue(user_id, Duration::from_secs(600))
            .unwrap();
        format!("Bearer {}", token)
    }

    /// Sign and deliver an event straight to the fulfillment service.
    pub async fn deliver(&self, payload: &[u8]) -> FulfillmentOutcome {
        let signature = sign_now(payload);
        self.state
            .fulfillment
            .receive(payload, &signature)
            .await
            .unwrap()
    }
}

pub fn sign_now(payload: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), payload)
}

/// A payment_intent event body. `purchase_id` goes into the intent metadata.
pub fn event_payload(
    event_id: &str,
    event_type: &str,
    payment_id: &str,
    purchase_id: Option<&str>,
) -> Vec<u8> {
    let metadata = match purchase_id {
        Some(id) => json!({ "purchase_id": id }),
        None => json!({}),
    };
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": payment_id,
                "object": "payment_intent",
                "metadata": metadata,
            }
        }
    }))
    .unwrap()
}

pub fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    json_request("POST", uri, auth, body)
}

pub fn json_request(method: &str, uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).expect("Response should be valid JSON")
}
