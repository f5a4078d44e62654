//! Shared wiring between the `engram-daemon` binary and `engram-cli serve`:
//! both start the same ops surface and the same two background loops, so
//! the bootstrap lives here once instead of twice.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use engram_breaker::BreakerConfig;
use engram_config::{CircuitBreakerConfig, DaemonConfig, OutboxConfig};
use engram_memory_client::MemoryServiceClient;
use sqlx::PgPool;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::{breaker_sweep::BreakerSweeper, outbox_worker::OutboxWorker, routes, state};

/// Converts the environment-loaded breaker config into the shape
/// `engram-breaker` expects. `min_samples` is `u32` in config (stable env
/// var parsing) but `u64` in `engram_breaker::BreakerConfig`; no existing
/// conversion lived anywhere else in the workspace.
pub fn to_breaker_config(cfg: &CircuitBreakerConfig) -> BreakerConfig {
    BreakerConfig {
        failure_rate_threshold: cfg.failure_rate_threshold,
        rate_limit_rate_threshold: cfg.rate_limit_rate_threshold,
        timeout_rate_threshold: cfg.timeout_rate_threshold,
        min_samples: cfg.min_samples as u64,
        smoothing_alpha: cfg.smoothing_alpha,
        enable_smoothing: cfg.enable_smoothing,
        open_duration_seconds: cfg.open_duration_seconds,
        recovery_success_count: cfg.recovery_success_count,
        probe_budget_per_interval: cfg.probe_budget_per_interval,
        probe_job_types_allowlist: cfg.probe_job_types_allowlist.clone(),
    }
}

pub fn spawn_outbox_worker(
    pool: PgPool,
    memory_client: Arc<dyn MemoryServiceClient>,
    cfg: OutboxConfig,
    shared: Arc<state::AppState>,
    poll_interval_seconds: u64,
) {
    let worker = OutboxWorker::new(pool, memory_client, cfg);
    tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(poll_interval_seconds.max(1)));
            loop {
                ticker.tick().await;
                match worker.run_once().await {
                    Ok(n) => {
                        if n > 0 {
                            info!(claimed = n, "outbox sweep processed rows");
                        }
                        shared.sweeps.write().await.last_outbox_sweep_at = Some(chrono::Utc::now());
                    }
                    Err(e) => tracing::warn!(error = %e, "outbox sweep failed"),
                }
            }
    });
}

pub fn spawn_breaker_sweep(pool: PgPool, cfg: CircuitBreakerConfig, shared: Arc<state::AppState>, interval_seconds: u64) {
    let sweeper = BreakerSweeper::new(pool, to_breaker_config(&cfg));
    tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
            loop {
                ticker.tick().await;
                match sweeper.run_once().await {
                    Ok(n) => {
                        if n > 0 {
                            info!(changed = n, "breaker idle sweep transitioned scopes");
                        }
                        shared.sweeps.write().await.last_breaker_sweep_at = Some(chrono::Utc::now());
                    }
                    Err(e) => tracing::warn!(error = %e, "breaker idle sweep failed"),
                }
            }
    });
}

/// CORS: allow only localhost origins, matching the other ops binaries in
/// this workspace.
pub fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
    .allow_origin(origins)
    .allow_methods([Method::GET])
    .allow_headers(tower_http::cors::Any)
}

/// Wires the outbox worker, breaker sweep, and ops-surface router together
/// and blocks serving on `daemon_cfg.bind_addr`. Used by both the
/// `engram-daemon` binary and `engram-cli serve`.
pub async fn run_server(
    pool: PgPool,
    memory_client: Arc<dyn MemoryServiceClient>,
    outbox_cfg: OutboxConfig,
    breaker_cfg: CircuitBreakerConfig,
    daemon_cfg: DaemonConfig,
) -> anyhow::Result<()> {
    let shared = Arc::new(state::AppState::new(pool.clone(), memory_client.clone()));

    spawn_outbox_worker(pool.clone(), memory_client, outbox_cfg, Arc::clone(&shared), daemon_cfg.outbox_poll_interval_seconds);
    spawn_breaker_sweep(pool, breaker_cfg, Arc::clone(&shared), daemon_cfg.breaker_sweep_interval_seconds);

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO)),
    ).layer(cors_localhost_only());

    let addr: SocketAddr = daemon_cfg.bind_addr.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("engram-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
    .await
    .context("server crashed")
}
