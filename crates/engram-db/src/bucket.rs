//! `analysis.instance_bucket`: persisted token bucket state, one row per
//! upstream instance key, for the rate limiter's shared-across-process mode.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct BucketRow {
    pub instance_key: String,
    pub tokens: f64,
    pub rate: f64,
    pub burst: f64,
    pub paused_until: Option<DateTime<Utc>>,
}

/// Reads or initializes the bucket for `instance_key` with `rate`/`burst` if
/// absent, then atomically deducts up to `n` tokens, refilling first for
/// elapsed time since `updated_at`. Returns the bucket state after the
/// attempt; the caller checks whether enough tokens were available by
/// comparing `tokens >= 0`.
///
/// Implemented as one round trip: refill and deduct both happen inside the
/// `update.. set tokens = least(burst, tokens + rate * extract(epoch from
/// now() - updated_at)) - n` expression, so no other connection can observe
/// an intermediate state.
pub async fn acquire(pool: &PgPool, instance_key: &str, rate: f64, burst: f64, n: f64) -> Result<BucketRow> {
    sqlx::query(
        r#"
 insert into analysis.instance_bucket (instance_key, tokens, rate, burst)
 values ($1, $3, $2, $3)
 on conflict (instance_key) do nothing
 "#,
    )
    .bind(instance_key)
    .bind(rate)
    .bind(burst)
    .execute(pool)
    .await
    .context("bucket acquire: init failed")?;

    let row = sqlx::query(
        r#"
 update analysis.instance_bucket
 set tokens = least(burst, tokens + rate * extract(epoch from now() - updated_at)) - $2,
 updated_at = now()
 where instance_key = $1
 returning instance_key, tokens, rate, burst, paused_until
 "#,
    )
    .bind(instance_key)
    .bind(n)
    .fetch_one(pool)
    .await
    .context("bucket acquire: deduct failed")?;

    row_to_bucket(row)
}

/// Refunds `n` tokens without exceeding `burst`, used when an attempt that
/// deducted tokens turns out not to have consumed upstream capacity (e.g.
/// it was short-circuited by a cached dedup hit).
pub async fn refund(pool: &PgPool, instance_key: &str, n: f64) -> Result<Option<BucketRow>> {
    let row = sqlx::query(
        r#"
 update analysis.instance_bucket
 set tokens = least(burst, tokens + $2), updated_at = now()
 where instance_key = $1
 returning instance_key, tokens, rate, burst, paused_until
 "#,
    )
    .bind(instance_key)
    .bind(n)
    .fetch_optional(pool)
    .await
    .context("bucket refund failed")?;

    row.map(row_to_bucket).transpose()
}

/// Sets (or clears, with `None`) a hard pause deadline, used when the
/// upstream explicitly signals a cooldown (`Retry-After`).
pub async fn set_paused_until(pool: &PgPool, instance_key: &str, paused_until: Option<DateTime<Utc>>) -> Result<()> {
    sqlx::query(
        r#"
 update analysis.instance_bucket
 set paused_until = $2, updated_at = now()
 where instance_key = $1
 "#,
    )
    .bind(instance_key)
    .bind(paused_until)
    .execute(pool)
    .await
    .context("bucket set_paused_until failed")?;

    Ok(())
}

pub async fn fetch(pool: &PgPool, instance_key: &str) -> Result<Option<BucketRow>> {
    let row = sqlx::query(
        r#"
 select instance_key, tokens, rate, burst, paused_until
 from analysis.instance_bucket
 where instance_key = $1
 "#,
    )
    .bind(instance_key)
    .fetch_optional(pool)
    .await
    .context("bucket fetch failed")?;

    row.map(row_to_bucket).transpose()
}

fn row_to_bucket(row: sqlx::postgres::PgRow) -> Result<BucketRow> {
    Ok(BucketRow {
            instance_key: row.try_get("instance_key")?,
            tokens: row.try_get("tokens")?,
            rate: row.try_get("rate")?,
            burst: row.try_get("burst")?,
            paused_until: row.try_get("paused_until")?,
    })
}
