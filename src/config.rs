use std::env;
use std::time::Duration;

/// Lifetimes for every ephemeral record the core creates.
///
/// Locks always carry one of these TTLs; nothing in the core is held without expiry.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Pending purchases older than this no longer block a new attempt.
    pub pending_purchase_window: Duration,
    pub purchase_lock_ttl: Duration,
    pub fulfillment_lock_ttl: Duration,
    /// How long a finished fulfillment is remembered after the lock is gone.
    pub fulfillment_marker_ttl: Duration,
    /// How long a gateway payment id can be resolved from the intent cache.
    pub intent_mapping_ttl: Duration,
    pub entitlement_cache_ttl: Duration,
    pub stream_token_ttl: Duration,
    pub download_token_ttl: Duration,
    pub lock_retry_attempts: u32,
    pub lock_retry_delay: Duration,
    /// Intent creations allowed per user per window (0 = unlimited)
    pub intent_rate_limit: u32,
    pub intent_rate_window: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            pending_purchase_window: Duration::from_secs(30 * 60),
            purchase_lock_ttl: Duration::from_secs(5 * 60),
            fulfillment_lock_ttl: Duration::from_secs(5 * 60),
            fulfillment_marker_ttl: Duration::from_secs(24 * 60 * 60),
            intent_mapping_ttl: Duration::from_secs(60 * 60),
            entitlement_cache_ttl: Duration::from_secs(60 * 60),
            stream_token_ttl: Duration::from_secs(4 * 60 * 60),
            download_token_ttl: Duration::from_secs(60 * 60),
            lock_retry_attempts: 2,
            lock_retry_delay: Duration::from_millis(50),
            intent_rate_limit: 10,
            intent_rate_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Shared key-value store. None = in-process store (single instance only).
    pub redis_url: Option<String>,
    pub dev_mode: bool,
    pub currency: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    /// HS256 secret shared with the identity service that issues session tokens
    pub session_secret: Option<String>,
    /// Hex-encoded 32-byte Ed25519 seed for streaming tokens
    pub stream_signing_key: Option<String>,
    pub policy: Policy,
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("PAYSTREAM_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let defaults = Policy::default();
        let policy = Policy {
            pending_purchase_window: env_secs(
                "PENDING_PURCHASE_WINDOW_SECS",
                defaults.pending_purchase_window,
            ),
            stream_token_ttl: env_secs("STREAM_TOKEN_TTL_SECS", defaults.stream_token_ttl),
            download_token_ttl: env_secs("DOWNLOAD_TOKEN_TTL_SECS", defaults.download_token_ttl),
            entitlement_cache_ttl: env_secs(
                "ENTITLEMENT_CACHE_TTL_SECS",
                defaults.entitlement_cache_ttl,
            ),
            intent_rate_limit: env::var("INTENT_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.intent_rate_limit),
            intent_rate_window: env_secs("INTENT_RATE_WINDOW_SECS", defaults.intent_rate_window),
            ..defaults
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "paystream.db".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            dev_mode,
            currency: env::var("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "usd".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            session_secret: env::var("SESSION_SECRET").ok(),
            stream_signing_key: env::var("STREAM_SIGNING_KEY").ok(),
            policy,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Secrets that must be present outside dev mode. Returns the names of missing ones.
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.stripe_secret_key.is_none() {
            missing.push("STRIPE_SECRET_KEY");
        }
        if self.stripe_webhook_secret.is_none() {
            missing.push("STRIPE_WEBHOOK_SECRET");
        }
        if self.session_secret.is_none() {
            missing.push("SESSION_SECRET");
        }
        if self.stream_signing_key.is_none() {
            missing.push("STREAM_SIGNING_KEY");
        }
        missing
    }
}
