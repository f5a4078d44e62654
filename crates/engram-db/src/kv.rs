//! `analysis.kv_store`: namespaced JSON blobs, used to persist circuit
//! breaker state per scope key so state survives process restarts.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};

pub async fn get(pool: &PgPool, namespace: &str, key: &str) -> Result<Option<Value>> {
    let row: Option<(Value,)> = sqlx::query_as(
        r#"
 select value from analysis.kv_store where namespace = $1 and key = $2
 "#,
    )
    .bind(namespace)
    .bind(key)
    .fetch_optional(pool)
    .await
    .context("kv get failed")?;

    Ok(row.map(|(v,)| v))
}

/// Unconditional upsert.
pub async fn put(pool: &PgPool, namespace: &str, key: &str, value: &Value) -> Result<()> {
    sqlx::query(
        r#"
 insert into analysis.kv_store (namespace, key, value, updated_at)
 values ($1, $2, $3, now())
 on conflict (namespace, key) do update
 set value = excluded.value, updated_at = now()
 "#,
    )
    .bind(namespace)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("kv put failed")?;

    Ok(())
}

/// Lists all keys stored under `namespace`. Used by periodic sweeps (e.g.
/// the daemon's circuit-breaker sweep) that need to visit every persisted
/// scope rather than one known key at a time.
pub async fn list_keys(pool: &PgPool, namespace: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
 select key from analysis.kv_store where namespace = $1 order by key
 "#,
    )
    .bind(namespace)
    .fetch_all(pool)
    .await
    .context("kv list_keys failed")?;

    Ok(rows.into_iter().map(|(k,)| k).collect())
}

/// Compare-and-set: writes `new_value` only if the stored value still
/// equals `expected` (or is absent, when `expected` is `None`). Used by the
/// circuit breaker to avoid clobbering a concurrent state transition with a
/// stale read.
pub async fn compare_and_set(
    pool: &PgPool,
    namespace: &str,
    key: &str,
    expected: Option<&Value>,
    new_value: &Value,
) -> Result<bool> {
    let updated = match expected {
        Some(expected) => {
            let row: Option<(String,)> = sqlx::query_as(
                r#"
 update analysis.kv_store
 set value = $4, updated_at = now()
 where namespace = $1 and key = $2 and value = $3
 returning key
 "#,
            )
            .bind(namespace)
            .bind(key)
            .bind(expected)
            .bind(new_value)
            .fetch_optional(pool)
            .await
            .context("kv compare_and_set (update) failed")?;
            row.is_some()
        }
        None => {
            let row: Option<(String,)> = sqlx::query_as(
                r#"
 insert into analysis.kv_store (namespace, key, value, updated_at)
 values ($1, $2, $3, now())
 on conflict (namespace, key) do nothing
 returning key
 "#,
            )
            .bind(namespace)
            .bind(key)
            .bind(new_value)
            .fetch_optional(pool)
            .await
            .context("kv compare_and_set (insert) failed")?;
            row.is_some()
        }
    };

    Ok(updated)
}
