use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use paystream::config::Config;
use paystream::db::create_pool;
use paystream::handlers;
use paystream::jwt::{SessionVerifier, StreamSigner};
use paystream::payments::{PaymentGateway, StripeGateway};
use paystream::state::AppState;
use paystream::store::{KeyValueStore, MemoryStore, RedisStore};
use paystream::util::random_hex;

#[derive(Parser, Debug)]
#[command(name = "paystream", version, about = "Video purchase fulfillment and entitlement service")]
struct Cli {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,

    /// Create the schema and exit
    #[arg(long)]
    init_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paystream=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let pool = create_pool(&config.database_path, 16)
        .with_context(|| format!("opening database {}", config.database_path))?;
    tracing::info!("Database ready at {}", config.database_path);

    if cli.init_only {
        return Ok(());
    }

    let missing = config.missing_secrets();
    if !missing.is_empty() {
        if !config.dev_mode {
            bail!("missing required configuration: {}", missing.join(", "));
        }
        tracing::warn!(
            "DEV: generating ephemeral values for {}; tokens will not survive a restart",
            missing.join(", ")
        );
        fill_dev_secrets(&mut config);
    }

    let store: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url)
                .await
                .with_context(|| format!("connecting to {}", url))?;
            tracing::info!("Using Redis store at {}", url);
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set; using in-process store (single instance only)");
            Arc::new(MemoryStore::new())
        }
    };

    // All present by now: configured, or filled in for dev
    let secret_key = config.stripe_secret_key.clone().unwrap_or_default();
    let webhook_secret = config.stripe_webhook_secret.clone().unwrap_or_default();
    let session_secret = config.session_secret.clone().unwrap_or_default();
    let signing_key = config.stream_signing_key.clone().unwrap_or_default();

    let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(
        &config.stripe_api_base,
        &secret_key,
        &webhook_secret,
    ));
    let sessions = SessionVerifier::new(session_secret.as_bytes());
    let signer = StreamSigner::from_hex(&signing_key).context("loading STREAM_SIGNING_KEY")?;

    let state = AppState::build(&config, pool, store, gateway, sessions, signer);
    let app = handlers::app(state).layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("paystream listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn fill_dev_secrets(config: &mut Config) {
    config
        .stripe_secret_key
        .get_or_insert_with(|| "sk_test_dev".to_string());
    config
        .stripe_webhook_secret
        .get_or_insert_with(|| format!("whsec_{}", random_hex(24)));
    config.session_secret.get_or_insert_with(|| random_hex(32));
    config.stream_signing_key.get_or_insert_with(|| random_hex(32));
}
