//! Shared runtime state for engram-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns
//! nothing async itself beyond the uptime clock.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use engram_memory_client::MemoryServiceClient;
use sqlx::PgPool;
use tokio::sync::RwLock;

/// Static build metadata included in the health response.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Timestamps of the last completed sweep of each background loop,
/// surfaced in `/v1/status` so an operator can tell a stalled loop from a
/// quiet one.
#[derive(Clone, Debug, Default)]
pub struct SweepTimestamps {
    pub last_outbox_sweep_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_breaker_sweep_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub memory_client: Arc<dyn MemoryServiceClient>,
    pub build: BuildInfo,
    pub sweeps: Arc<RwLock<SweepTimestamps>>,
}

impl AppState {
    pub fn new(pool: PgPool, memory_client: Arc<dyn MemoryServiceClient>) -> Self {
        Self {
            pool,
            memory_client,
            build: BuildInfo {
                service: "engram-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            sweeps: Arc::new(RwLock::new(SweepTimestamps::default())),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs()
}
