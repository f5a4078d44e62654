//! engram-daemon entry point.
//!
//! This file is intentionally thin: it loads config, connects the pool, and
//! hands off to `bootstrap::run_server`, which also backs `engram-cli serve`
//! so the two binaries can't drift. Route handlers live in `routes.rs`;
//! shared state lives in `state.rs`.

use std::sync::Arc;

use engram_config::{CircuitBreakerConfig, DaemonConfig, MemoryServiceConfig, OutboxConfig, StoreConfig};
use engram_daemon::bootstrap;
use engram_memory_client::HttpMemoryServiceClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load.env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let store_cfg = StoreConfig::from_env()?;
    let memory_cfg = MemoryServiceConfig::from_env()?;
    let outbox_cfg = OutboxConfig::from_env()?;
    let breaker_cfg = CircuitBreakerConfig::from_env()?;
    let daemon_cfg = DaemonConfig::from_env()?;

    let pool = engram_db::connect(&store_cfg.postgres_dsn).await?;
    engram_db::migrate(&pool, &store_cfg.migrate_lock_key()).await?;

    let memory_client = Arc::new(HttpMemoryServiceClient::new(&memory_cfg)?);

    bootstrap::run_server(pool, memory_client, outbox_cfg, breaker_cfg, daemon_cfg).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .init();
}
