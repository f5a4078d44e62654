//! Axum router and handlers for engram-daemon's ops surface.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use engram_db::{outbox, scm};

use crate::{
    api_types::{HealthResponse, MetricsResponse, StatusResponse},
    state::{uptime_secs, AppState},
};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
    .route("/v1/health", get(health))
    .route("/v1/status", get(status_handler))
    .route("/v1/metrics", get(metrics_handler))
    .with_state(state)
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
                ok: true,
                service: st.build.service,
                version: st.build.version,
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let sweeps = st.sweeps.read().await.clone();

    let outbox_pending = outbox::count_by_status(&st.pool, "pending").await.unwrap_or(-1);
    let outbox_dead = outbox::count_by_status(&st.pool, "dead").await.unwrap_or(-1);
    let scm_jobs_queued = scm::count_queued(&st.pool).await.unwrap_or(-1);

    (
        StatusCode::OK,
        Json(StatusResponse {
                daemon_uptime_secs: uptime_secs(),
                outbox_pending,
                outbox_dead,
                scm_jobs_queued,
                last_outbox_sweep_at: sweeps.last_outbox_sweep_at,
                last_breaker_sweep_at: sweeps.last_breaker_sweep_at,
        }),
    )
}

pub(crate) async fn metrics_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let outbox_pending = outbox::count_by_status(&st.pool, "pending").await.unwrap_or(-1);
    let outbox_dead = outbox::count_by_status(&st.pool, "dead").await.unwrap_or(-1);
    let scm_jobs_queued = scm::count_queued(&st.pool).await.unwrap_or(-1);
    let breaker_scopes_open = engram_breaker::persist::count_open(&st.pool).await.unwrap_or(-1);

    (
        StatusCode::OK,
        Json(MetricsResponse {
                outbox_pending,
                outbox_dead,
                scm_jobs_queued,
                breaker_scopes_open,
        }),
    )
}
