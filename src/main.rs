//! SoulDream billing service entry point.

use std::net::AddrParseError;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderValue, Method};
use thiserror::Error;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use souldream_billing::adapters::http::{subscription_router, SubscriptionAppState};
use souldream_billing::adapters::paypal::{PayPalGateway, PostbackVerifier};
use souldream_billing::adapters::postgres::PostgresSubscriptionRepository;
use souldream_billing::application::handlers::subscription::{
    ExpireElapsedHandler, ReconcileSubscriptionHandler, TransitionCommitter,
};
use souldream_billing::config::{
    AppConfig, ConfigError, ServerConfig, ValidationError, VerificationStrategy,
};
use souldream_billing::domain::foundation::Timestamp;
use souldream_billing::domain::subscription::{EntitlementGate, Reconciler};
use souldream_billing::domain::webhook::SharedSecretVerifier;
use souldream_billing::ports::{SubscriptionRepository, WebhookSignatureVerifier};

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid listen address: {0}")]
    Address(#[from] AddrParseError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate().map_err(ConfigError::from)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        port = config.server.port,
        paypal_mode = ?config.paypal.mode,
        verification = ?config.paypal.verification,
        db_max_connections = config.database.max_connections,
        "Starting souldream-billing"
    );

    let pool = config
        .database
        .pool_options()
        .connect(&config.database.url)
        .await?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");
    }

    let repository: Arc<dyn SubscriptionRepository> =
        Arc::new(PostgresSubscriptionRepository::new(pool));
    let paypal = Arc::new(PayPalGateway::new(config.paypal.gateway_config()));
    let verifier = build_verifier(&config, paypal.clone())?;
    let committer = Arc::new(TransitionCommitter::new(
        repository.clone(),
        Reconciler::default(),
    ));

    let state = SubscriptionAppState {
        repository: repository.clone(),
        gateway: paypal,
        verifier,
        committer: committer.clone(),
        entitlement_gate: EntitlementGate::with_grace_minutes(
            config.billing.pending_grace_minutes,
        ),
        webhook_timeout: config.billing.webhook_timeout(),
        approval_window: config.billing.approval_window(),
    };

    let batch_size = config.billing.batch_size;
    match config.billing.sweep_interval() {
        Some(every) => {
            let sweeper = ExpireElapsedHandler::new(repository.clone(), committer.clone());
            tokio::spawn(run_period_sweeper(sweeper, every, batch_size));
        }
        None => info!("Period sweeper disabled"),
    }
    match config.billing.reconcile_interval() {
        Some(every) => {
            tokio::spawn(run_scheduled_reconcile(
                state.reconcile_handler(),
                every,
                batch_size,
            ));
        }
        None => info!("Scheduled reconciliation disabled"),
    }

    let router = subscription_router()
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .layer(cors_layer(&config.server))
        .with_state(state);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Service shutdown complete");
    Ok(())
}

/// JSON logs in production, human-readable otherwise. `RUST_LOG` wins over
/// the configured filter.
fn init_tracing(server: &ServerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&server.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if server.is_production() {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

fn build_verifier(
    config: &AppConfig,
    paypal: Arc<PayPalGateway>,
) -> Result<Arc<dyn WebhookSignatureVerifier>, ConfigError> {
    let webhook_id = config.paypal.webhook_id.clone();
    match config.paypal.verification {
        VerificationStrategy::Postback => Ok(Arc::new(PostbackVerifier::new(paypal, webhook_id))),
        VerificationStrategy::SharedSecret => {
            let secret = config.paypal.webhook_shared_secret.clone().ok_or(
                ValidationError::MissingRequired("PAYPAL__WEBHOOK_SHARED_SECRET"),
            )?;
            warn!("Webhook deliveries are verified with a shared secret");
            Ok(Arc::new(SharedSecretVerifier::new(secret, webhook_id)))
        }
    }
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(&origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

async fn run_period_sweeper(handler: ExpireElapsedHandler, every: Duration, batch_size: u32) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = handler.sweep(Timestamp::now(), batch_size).await {
            error!(error = %e, "Period sweep failed");
        }
    }
}

async fn run_scheduled_reconcile(
    handler: ReconcileSubscriptionHandler,
    every: Duration,
    batch_size: u32,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = handler.reconcile_batch(batch_size).await {
            error!(error = %e, "Scheduled reconciliation failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
