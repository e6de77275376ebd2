//! HTTP surface over the proof-of-life engine.

pub mod dto;
pub mod error;
pub mod extract;
pub mod handlers;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::engine::ProofOfLifeEngine;
use crate::will::WillId;

pub const DEFAULT_OVERRIDE_ATTEMPTS_PER_MINUTE: u32 = 5;

/// How often idle per-will limiter entries are dropped.
pub const DEFAULT_LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProofOfLifeEngine>,
    pub override_limiter: Arc<DefaultKeyedRateLimiter<WillId>>,
}

impl AppState {
    pub fn new(engine: Arc<ProofOfLifeEngine>, override_attempts_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(override_attempts_per_minute)
            .or(NonZeroU32::new(DEFAULT_OVERRIDE_ATTEMPTS_PER_MINUTE))
            .unwrap_or(NonZeroU32::MIN);
        Self::with_override_quota(engine, Quota::per_minute(per_minute))
    }

    pub fn with_override_quota(engine: Arc<ProofOfLifeEngine>, quota: Quota) -> Self {
        Self {
            engine,
            override_limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Drop limiter entries whose budget has fully refilled. Any id can be
    /// posted to the override route, so the key set is otherwise unbounded.
    pub fn prune_override_limiter(&self) {
        prune(&self.override_limiter);
    }

    pub fn spawn_limiter_pruning(
        &self,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(&self.override_limiter);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Override limiter pruning stopped");
                        break;
                    }
                    _ = ticker.tick() => prune(&limiter),
                }
            }
        })
    }
}

fn prune(limiter: &DefaultKeyedRateLimiter<WillId>) {
    let before = limiter.len();
    limiter.retain_recent();
    limiter.shrink_to_fit();
    debug!(before, after = limiter.len(), "Pruned override limiter");
}

pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/db", get(handlers::health_db))
        .route(
            "/api/wills",
            post(handlers::create_will).get(handlers::list_wills),
        )
        .route(
            "/api/wills/:id",
            get(handlers::get_will)
                .put(handlers::update_will)
                .delete(handlers::cancel_will),
        )
        .route("/api/wills/:id/deposit", post(handlers::deposit))
        .route("/api/wills/:id/deploy", post(handlers::deploy))
        .route("/api/wills/:id/check-in", post(handlers::check_in))
        .route("/api/wills/:id/override", post(handlers::override_execute))
        .route(
            "/api/wills/:id/distribution/retry",
            post(handlers::retry_distribution),
        )
        .route("/api/wills/:id/letter", get(handlers::read_letter))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
