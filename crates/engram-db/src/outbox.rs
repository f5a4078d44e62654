//! `logbook.outbox_memory`, the durable queue of writes, claimed and drained
//! by the outbox worker.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub outbox_id: i64,
    pub item_id: Option<String>,
    pub target_space: String,
    pub payload_md: String,
    pub payload_sha: String,
    pub status: String,
    pub retry_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

fn row_to_outbox(row: sqlx::postgres::PgRow) -> Result<OutboxRow> {
    Ok(OutboxRow {
            outbox_id: row.try_get("outbox_id")?,
            item_id: row.try_get("item_id")?,
            target_space: row.try_get("target_space")?,
            payload_md: row.try_get("payload_md")?,
            payload_sha: row.try_get("payload_sha")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            locked_by: row.try_get("locked_by")?,
            locked_at: row.try_get("locked_at")?,
            last_error: row.try_get("last_error")?,
    })
}

/// Enqueues a write. Returns the new `outbox_id`.
pub async fn enqueue(
    pool: &PgPool,
    item_id: Option<&str>,
    target_space: &str,
    payload_md: &str,
    payload_sha: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<i64> {
    let (outbox_id,): (i64,) = sqlx::query_as(
        r#"
 insert into logbook.outbox_memory
 (item_id, target_space, payload_md, payload_sha, status, next_attempt_at)
 values ($1, $2, $3, $4, 'pending', $5)
 returning outbox_id
 "#,
    )
    .bind(item_id)
    .bind(target_space)
    .bind(payload_md)
    .bind(payload_sha)
    .bind(next_attempt_at)
    .fetch_one(pool)
    .await
    .context("outbox enqueue failed")?;

    Ok(outbox_id)
}

/// Looks up a `sent` row with the given dedup key `(target_space,
/// payload_sha)`, used both by write-governance dedup and by
/// the outbox worker's own dedup check.
pub async fn find_sent_by_dedup_key(
    pool: &PgPool,
    target_space: &str,
    payload_sha: &str,
) -> Result<Option<OutboxRow>> {
    let row = sqlx::query(
        r#"
 select outbox_id, item_id, target_space, payload_md, payload_sha, status,
 retry_count, next_attempt_at, locked_by, locked_at, last_error
 from logbook.outbox_memory
 where target_space = $1 and payload_sha = $2 and status = 'sent'
 "#,
    )
    .bind(target_space)
    .bind(payload_sha)
    .fetch_optional(pool)
    .await
    .context("find_sent_by_dedup_key failed")?;

    row.map(row_to_outbox).transpose()
}

pub async fn fetch(pool: &PgPool, outbox_id: i64) -> Result<Option<OutboxRow>> {
    let row = sqlx::query(
        r#"
 select outbox_id, item_id, target_space, payload_md, payload_sha, status,
 retry_count, next_attempt_at, locked_by, locked_at, last_error
 from logbook.outbox_memory
 where outbox_id = $1
 "#,
    )
    .bind(outbox_id)
    .fetch_optional(pool)
    .await
    .context("outbox fetch failed")?;

    row.map(row_to_outbox).transpose()
}

/// Atomically claims up to `batch_size` rows eligible for dispatch: pending
/// and due, or previously claimed but past lease expiry. Uses `FOR UPDATE
/// SKIP LOCKED` so concurrent workers never claim the same row.
///
/// Gated behind `runtime-claim-outbox`: only the outbox worker's dispatch
/// loop may call this, enforced at compile time rather than by convention.
#[cfg(feature = "runtime-claim-outbox")]
pub async fn claim_batch(
    pool: &PgPool,
    batch_size: i64,
    worker_id: &str,
    lease_seconds: i64,
) -> Result<Vec<OutboxRow>> {
    let rows = sqlx::query(
        r#"
 with to_claim as (
 select outbox_id
 from logbook.outbox_memory
 where status = 'pending'
 and next_attempt_at <= now()
 and (locked_at is null or locked_at + make_interval(secs => $3) < now())
 order by outbox_id asc
 limit $1
 for update skip locked
 )
 update logbook.outbox_memory
 set locked_by = $2,
 locked_at = now(),
 updated_at = now()
 where outbox_id in (select outbox_id from to_claim)
 returning outbox_id, item_id, target_space, payload_md, payload_sha, status,
 retry_count, next_attempt_at, locked_by, locked_at, last_error
 "#,
    )
    .bind(batch_size)
    .bind(worker_id)
    .bind(lease_seconds)
    .fetch_all(pool)
    .await
    .context("outbox claim_batch failed")?;

    rows.into_iter().map(row_to_outbox).collect()
}

/// Renews the lease on a still-in-flight claimed row.
pub async fn renew_lease(pool: &PgPool, outbox_id: i64, worker_id: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
 update logbook.outbox_memory
 set locked_at = now(), updated_at = now()
 where outbox_id = $1 and locked_by = $2
 returning outbox_id
 "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("outbox renew_lease failed")?;

    Ok(row.is_some())
}

/// Guarded transition to `sent` on delivery success. Returns `false` (a
/// conflict) if `(outbox_id, locked_by)` no longer matches: the lease was
/// stolen or the row already moved on.
pub async fn mark_sent(
    pool: &PgPool,
    outbox_id: i64,
    worker_id: &str,
    memory_id: &str,
) -> Result<bool> {
    let last_error = format!("memory_id={memory_id}");
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
 update logbook.outbox_memory
 set status = 'sent', last_error = $3, locked_by = null, updated_at = now()
 where outbox_id = $1 and locked_by = $2 and status = 'pending'
 returning outbox_id
 "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .bind(&last_error)
    .fetch_optional(pool)
    .await
    .context("outbox mark_sent failed")?;

    Ok(row.is_some())
}

/// Guarded transition used by the dedup-hit branch: marks a
/// row `sent` without a delivery attempt, carrying the original row's
/// `memory_id`.
pub async fn mark_sent_as_dedup(
    pool: &PgPool,
    outbox_id: i64,
    worker_id: &str,
    memory_id: &str,
) -> Result<bool> {
    mark_sent(pool, outbox_id, worker_id, memory_id).await
}

/// Guarded transition on recoverable failure.
/// Increments `retry_count`, clears the lock, and sets `next_attempt_at`.
pub async fn mark_retry(
    pool: &PgPool,
    outbox_id: i64,
    worker_id: &str,
    error: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
 update logbook.outbox_memory
 set retry_count = retry_count + 1,
 next_attempt_at = $3,
 last_error = $4,
 locked_by = null,
 updated_at = now()
 where outbox_id = $1 and locked_by = $2 and status = 'pending'
 returning outbox_id
 "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .bind(next_attempt_at)
    .bind(error)
    .fetch_optional(pool)
    .await
    .context("outbox mark_retry failed")?;

    Ok(row.is_some())
}

/// Guarded terminal transition to `dead`.
pub async fn mark_dead(pool: &PgPool, outbox_id: i64, worker_id: &str, error: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
 update logbook.outbox_memory
 set status = 'dead', last_error = $3, locked_by = null, updated_at = now()
 where outbox_id = $1 and locked_by = $2 and status = 'pending'
 returning outbox_id
 "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .bind(error)
    .fetch_optional(pool)
    .await
    .context("outbox mark_dead failed")?;

    Ok(row.is_some())
}

/// Releases a claim without any status change, used when a `QueryCanceled`
/// (statement timeout) leaves the row's state ambiguous. The lease is
/// left to expire naturally rather than guessing at a terminal status;
/// this is exposed for operator-driven recovery only, not the happy path.
pub async fn release_claim(pool: &PgPool, outbox_id: i64, worker_id: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
 update logbook.outbox_memory
 set locked_by = null, locked_at = null, updated_at = now()
 where outbox_id = $1 and locked_by = $2
 returning outbox_id
 "#,
    )
    .bind(outbox_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("outbox release_claim failed")?;

    Ok(row.is_some())
}

/// Operator recovery: resets a `dead` row back to `pending`.
pub async fn reset_dead_to_pending(pool: &PgPool, outbox_id: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
 update logbook.outbox_memory
 set status = 'pending', retry_count = 0, next_attempt_at = now(),
 last_error = null, updated_at = now()
 where outbox_id = $1 and status = 'dead'
 returning outbox_id
 "#,
    )
    .bind(outbox_id)
    .fetch_optional(pool)
    .await
    .context("outbox reset_dead_to_pending failed")?;

    Ok(row.is_some())
}

pub async fn list_pending(pool: &PgPool, limit: i64) -> Result<Vec<OutboxRow>> {
    let rows = sqlx::query(
        r#"
 select outbox_id, item_id, target_space, payload_md, payload_sha, status,
 retry_count, next_attempt_at, locked_by, locked_at, last_error
 from logbook.outbox_memory
 where status = 'pending'
 order by next_attempt_at asc
 limit $1
 "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("outbox list_pending failed")?;

    rows.into_iter().map(row_to_outbox).collect()
}

/// Count of rows in `status`, for ops-surface gauges.
pub async fn count_by_status(pool: &PgPool, status: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from logbook.outbox_memory where status = $1",
    )
    .bind(status)
    .fetch_one(pool)
    .await
    .context("outbox count_by_status failed")?;

    Ok(count)
}
