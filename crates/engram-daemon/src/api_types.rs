//! Request and response types for the ops surface. No business logic here.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub outbox_pending: i64,
    pub outbox_dead: i64,
    pub scm_jobs_queued: i64,
    pub last_outbox_sweep_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_breaker_sweep_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// `/v1/metrics` only needs to report the three counters named below, so
/// this stays a typed JSON body rather than growing a Prometheus exposition
/// format this workspace has no other consumer for.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub outbox_pending: i64,
    pub outbox_dead: i64,
    pub scm_jobs_queued: i64,
    pub breaker_scopes_open: i64,
}
