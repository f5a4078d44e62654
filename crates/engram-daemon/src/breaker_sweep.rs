//! Periodic idle sweep so a quiet circuit-breaker scope whose open
//! window has elapsed moves to half-open even without live traffic probing
//! it.

use std::time::Duration;

use engram_breaker::BreakerConfig;
use sqlx::PgPool;

pub struct BreakerSweeper {
    pool: PgPool,
    cfg: BreakerConfig,
}

impl BreakerSweeper {
    pub fn new(pool: PgPool, cfg: BreakerConfig) -> Self {
        Self { pool, cfg }
    }

    pub async fn run_once(&self) -> anyhow::Result<usize> {
        engram_breaker::persist::sweep_idle(&self.pool, &self.cfg, chrono::Utc::now()).await
    }

    pub async fn run_loop(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(changed = n, "breaker idle sweep transitioned scopes"),
                Err(e) => tracing::warn!(error = %e, "breaker idle sweep failed"),
            }
        }
    }
}
