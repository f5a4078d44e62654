//! Postgres pool fixture for scenario tests.

use sqlx::PgPool;

/// Connects to `ENGRAM_TEST_DATABASE_URL` and runs migrations under the
/// given lock key. Returns `None` if the var is unset so callers can skip
/// rather than fail when no test database is configured.
pub async fn db_pool(migrate_lock_key: &str) -> anyhow::Result<Option<PgPool>> {
    let url = match std::env::var("ENGRAM_TEST_DATABASE_URL") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(4).connect(&url).await?;
    engram_db::migrate(&pool, migrate_lock_key).await?;
    Ok(Some(pool))
}
