use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use smartwill_backend::api::{create_router, AppState, DEFAULT_LIMITER_PRUNE_INTERVAL};
use smartwill_backend::clock::SystemClock;
use smartwill_backend::config::AppConfig;
use smartwill_backend::executor::HttpDistributionExecutor;
use smartwill_backend::identity::JwtIdentityProvider;
use smartwill_backend::notify::{NotificationSink, TracingNotifier, WebhookNotifier};
use smartwill_backend::store::PgWillStore;
use smartwill_backend::sweep::SweepDriver;
use smartwill_backend::telemetry::init_logging;
use smartwill_backend::ProofOfLifeEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.log).context("failed to initialise logging")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    let store = PgWillStore::new(pool);
    store.migrate().await.context("failed to run migrations")?;
    info!("Database migrations applied");

    let notifier: Arc<dyn NotificationSink> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(config.notifications.timeout_secs),
            )
            .context("failed to build notification client")?,
        ),
        None => Arc::new(TracingNotifier),
    };

    let executor = HttpDistributionExecutor::new(
        config.distribution.executor_url.clone(),
        Duration::from_secs(config.distribution.timeout_secs),
    )
    .context("failed to build distribution client")?;

    let engine = Arc::new(ProofOfLifeEngine::new(
        Arc::new(store),
        Arc::new(JwtIdentityProvider::new(&config.auth.jwt_secret)),
        notifier,
        Arc::new(executor),
        Arc::new(SystemClock),
        config.engine_config(),
    ));

    let shutdown = CancellationToken::new();
    let sweeper = SweepDriver::new(
        engine.clone(),
        config.sweep.interval(),
        config.sweep.page_size,
    )
    .spawn(shutdown.clone());

    let state = AppState::new(engine.clone(), config.rate_limit.override_attempts_per_minute);
    let pruner = state.spawn_limiter_pruning(DEFAULT_LIMITER_PRUNE_INTERVAL, shutdown.clone());
    let app = create_router(state);

    let addr = config
        .server
        .socket_addr()
        .context("invalid server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Smart will backend listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "Sweep driver terminated abnormally");
    }
    if let Err(e) = pruner.await {
        error!(error = %e, "Limiter pruning terminated abnormally");
    }
    engine.flush_notifications().await;
    info!("Pending notifications delivered");

    Ok(())
}
