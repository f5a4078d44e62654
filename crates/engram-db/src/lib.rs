//! Postgres-backed store for the coordination substrate.
//!
//! Every public operation here is a single statement (or a `WITH.. AS`
//! claim-then-update in one round trip) rather than a long-held
//! transaction, per the concurrency model: settings, audit, outbox, and
//! sync_job rows are mediated by row-level guards and atomic claim/update,
//! not application-level locking.

pub mod actor;
pub mod audit;
pub mod bucket;
pub mod kv;
pub mod outbox;
pub mod scm;
pub mod settings;

mod error;

pub use error::StoreError;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "ENGRAM_POSTGRES_DSN";

/// Connect to Postgres using `ENGRAM_POSTGRES_DSN`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
    .max_connections(10)
    .connect(dsn)
    .await
    .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations under the advisory lock named by the
/// caller (`StoreConfig::migrate_lock_key`). `sqlx::migrate!` already takes
/// its own internal advisory lock scoped to the migrations table, but we
/// additionally serialize on the caller-supplied key so multiple engram
/// deployments sharing one Postgres instance with different schema
/// prefixes don't contend on each other's migration runs.
pub async fn migrate(pool: &PgPool, lock_key: &str) -> Result<()> {
    let key = lock_key_to_i64(lock_key);
    sqlx::query("select pg_advisory_lock($1)")
    .bind(key)
    .execute(pool)
    .await
    .context("failed to acquire migration advisory lock")?;

    let result = sqlx::migrate!("./migrations").run(pool).await;

    sqlx::query("select pg_advisory_unlock($1)")
    .bind(key)
    .execute(pool)
    .await
    .context("failed to release migration advisory lock")?;

    result.context("db migrate failed")?;
    Ok(())
}

fn lock_key_to_i64(key: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as i64
}

/// Simple connectivity + schema-presence status check.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
    .fetch_one(pool)
    .await
    .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
 select exists (
 select 1 from information_schema.tables
 where table_schema = 'logbook' and table_name = 'outbox_memory'
 )
 "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
            ok: one == 1,
            has_core_tables: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_core_tables: bool,
}
