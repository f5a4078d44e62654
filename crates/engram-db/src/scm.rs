//! `scm.repository`, `scm.sync_job`, `scm.sync_run`: the source-control
//! sync job queue and its run history.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RepositoryRow {
    pub repo_id: Uuid,
    pub vcs_type: String,
    pub remote_url: String,
    pub tenant_id: Option<String>,
    pub instance_key: String,
}

pub async fn upsert_repository(
    pool: &PgPool,
    vcs_type: &str,
    remote_url: &str,
    tenant_id: Option<&str>,
    instance_key: &str,
) -> Result<RepositoryRow> {
    let row = sqlx::query(
        r#"
 insert into scm.repository (vcs_type, remote_url, tenant_id, instance_key)
 values ($1, $2, $3, $4)
 on conflict (remote_url) do update
 set tenant_id = excluded.tenant_id, instance_key = excluded.instance_key
 returning repo_id, vcs_type, remote_url, tenant_id, instance_key
 "#,
    )
    .bind(vcs_type)
    .bind(remote_url)
    .bind(tenant_id)
    .bind(instance_key)
    .fetch_one(pool)
    .await
    .context("upsert_repository failed")?;

    row_to_repository(row)
}

fn row_to_repository(row: sqlx::postgres::PgRow) -> Result<RepositoryRow> {
    Ok(RepositoryRow {
            repo_id: row.try_get("repo_id")?,
            vcs_type: row.try_get("vcs_type")?,
            remote_url: row.try_get("remote_url")?,
            tenant_id: row.try_get("tenant_id")?,
            instance_key: row.try_get("instance_key")?,
    })
}

#[derive(Debug, Clone)]
pub struct SyncJobRow {
    pub job_id: Uuid,
    pub repo_id: Uuid,
    pub job_type: String,
    pub mode: String,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub not_before: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lease_seconds: i32,
    pub last_run_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub payload_json: Value,
}

fn row_to_job(row: sqlx::postgres::PgRow) -> Result<SyncJobRow> {
    Ok(SyncJobRow {
            job_id: row.try_get("job_id")?,
            repo_id: row.try_get("repo_id")?,
            job_type: row.try_get("job_type")?,
            mode: row.try_get("mode")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            not_before: row.try_get("not_before")?,
            locked_by: row.try_get("locked_by")?,
            locked_at: row.try_get("locked_at")?,
            lease_seconds: row.try_get("lease_seconds")?,
            last_run_id: row.try_get("last_run_id")?,
            last_error: row.try_get("last_error")?,
            payload_json: row.try_get("payload_json")?,
    })
}

/// Enqueues a sync job. Idempotent with respect to the
/// `(repo_id, job_type, mode)` family while a non-terminal row exists
/// (`ux_sync_job_family`): a conflicting enqueue is a no-op, returning the
/// existing row instead of erroring.
pub async fn enqueue_job(
    pool: &PgPool,
    repo_id: Uuid,
    job_type: &str,
    mode: &str,
    priority: i32,
    payload_json: Value,
) -> Result<SyncJobRow> {
    let inserted = sqlx::query(
        r#"
 insert into scm.sync_job (repo_id, job_type, mode, priority, payload_json)
 values ($1, $2, $3, $4, $5)
 on conflict do nothing
 returning job_id, repo_id, job_type, mode, priority, status, attempts, max_attempts,
 not_before, locked_by, locked_at, lease_seconds, last_run_id, last_error, payload_json
 "#,
    )
    .bind(repo_id)
    .bind(job_type)
    .bind(mode)
    .bind(priority)
    .bind(&payload_json)
    .fetch_optional(pool)
    .await
    .context("enqueue_job failed")?;

    if let Some(row) = inserted {
        return row_to_job(row);
    }

    let existing = sqlx::query(
        r#"
 select job_id, repo_id, job_type, mode, priority, status, attempts, max_attempts,
 not_before, locked_by, locked_at, lease_seconds, last_run_id, last_error, payload_json
 from scm.sync_job
 where repo_id = $1 and job_type = $2 and mode = $3 and status in ('pending', 'running')
 "#,
    )
    .bind(repo_id)
    .bind(job_type)
    .bind(mode)
    .fetch_one(pool)
    .await
    .context("enqueue_job: read-back of existing family member failed")?;

    row_to_job(existing)
}

/// Claims up to `batch_size` due jobs, honoring a per-round cap on how many
/// jobs may come from any single tenant so that one noisy tenant cannot
/// starve the others. Jobs are still ordered
/// globally by `(priority desc, not_before asc)` within the per-tenant cap.
#[cfg(feature = "runtime-claim-scm")]
pub async fn claim_batch(
    pool: &PgPool,
    batch_size: i64,
    worker_id: &str,
    tenant_fairness_max_per_round: Option<i64>,
) -> Result<Vec<SyncJobRow>> {
    let cap = tenant_fairness_max_per_round.unwrap_or(i64::MAX);

    let rows = sqlx::query(
        r#"
 with candidates as (
 select j.job_id,
 row_number() over (
 partition by r.tenant_id
 order by j.priority desc, j.not_before asc
 ) as tenant_rank
 from scm.sync_job j
 join scm.repository r on r.repo_id = j.repo_id
 where (j.status = 'pending' or
 (j.status = 'running' and
 j.locked_at + make_interval(secs => j.lease_seconds) < now()))
 and j.not_before <= now()
 ),
 ranked as (
 select job_id
 from candidates
 where tenant_rank <= $3
 order by tenant_rank asc
 limit $1
 ),
 to_claim as (
 select job_id from scm.sync_job
 where job_id in (select job_id from ranked)
 for update skip locked
 )
 update scm.sync_job
 set status = 'running',
 attempts = attempts + 1,
 locked_by = $2,
 locked_at = now(),
 updated_at = now()
 where job_id in (select job_id from to_claim)
 returning job_id, repo_id, job_type, mode, priority, status, attempts, max_attempts,
 not_before, locked_by, locked_at, lease_seconds, last_run_id, last_error, payload_json
 "#,
    )
    .bind(batch_size)
    .bind(worker_id)
    .bind(cap)
    .fetch_all(pool)
    .await
    .context("scm claim_batch failed")?;

    rows.into_iter().map(row_to_job).collect()
}

pub async fn renew_lease(pool: &PgPool, job_id: Uuid, worker_id: &str) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
 update scm.sync_job
 set locked_at = now(), updated_at = now()
 where job_id = $1 and locked_by = $2 and status = 'running'
 returning job_id
 "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("scm renew_lease failed")?;

    Ok(row.is_some())
}

/// Acks a job as completed. Terminal: `attempts` is left as-is.
pub async fn ack(pool: &PgPool, job_id: Uuid, worker_id: &str, run_id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
 update scm.sync_job
 set status = 'completed', locked_by = null, last_run_id = $3, updated_at = now()
 where job_id = $1 and locked_by = $2 and status = 'running'
 returning job_id
 "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("scm ack failed")?;

    Ok(row.is_some())
}

/// Fails a job with a recoverable error. If `attempts >= max_attempts`
/// transitions to `dead` instead of scheduling a retry; `attempts` was
/// already incremented at claim time, so neither path touches it further.
pub async fn fail_retry(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
    error: &str,
    not_before: DateTime<Utc>,
    run_id: Option<Uuid>,
) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
 update scm.sync_job
 set status = case when attempts >= max_attempts then 'dead' else 'pending' end,
 not_before = $3,
 last_error = $4,
 last_run_id = coalesce($5, last_run_id),
 locked_by = null,
 updated_at = now()
 where job_id = $1 and locked_by = $2 and status = 'running'
 returning job_id
 "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(not_before)
    .bind(error)
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("scm fail_retry failed")?;

    Ok(row.is_some())
}

/// Requeues a job without penalizing it: used when a job is displaced for
/// reasons unrelated to its own correctness (e.g. a deploy draining a
/// worker). `attempts` is decremented (floored at 0) to undo the increment
/// taken at claim time, and the row goes back to `pending` immediately.
pub async fn requeue_without_penalty(pool: &PgPool, job_id: Uuid, worker_id: &str) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
 update scm.sync_job
 set status = 'pending',
 attempts = greatest(attempts - 1, 0),
 locked_by = null,
 not_before = now(),
 updated_at = now()
 where job_id = $1 and locked_by = $2 and status = 'running'
 returning job_id
 "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("scm requeue_without_penalty failed")?;

    Ok(row.is_some())
}

pub async fn mark_dead(pool: &PgPool, job_id: Uuid, worker_id: &str, error: &str) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
 update scm.sync_job
 set status = 'dead', last_error = $3, locked_by = null, updated_at = now()
 where job_id = $1 and locked_by = $2 and status = 'running'
 returning job_id
 "#,
    )
    .bind(job_id)
    .bind(worker_id)
    .bind(error)
    .fetch_optional(pool)
    .await
    .context("scm mark_dead failed")?;

    Ok(row.is_some())
}

pub async fn fetch_job(pool: &PgPool, job_id: Uuid) -> Result<Option<SyncJobRow>> {
    let row = sqlx::query(
        r#"
 select job_id, repo_id, job_type, mode, priority, status, attempts, max_attempts,
 not_before, locked_by, locked_at, lease_seconds, last_run_id, last_error, payload_json
 from scm.sync_job
 where job_id = $1
 "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .context("scm fetch_job failed")?;

    row.map(row_to_job).transpose()
}

#[derive(Debug, Clone)]
pub struct NewSyncRun {
    pub repo_id: Uuid,
    pub job_type: String,
    pub cursor_before: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncRunRow {
    pub run_id: Uuid,
    pub repo_id: Uuid,
    pub job_type: String,
    pub started_at: DateTime<Utc>,
}

pub async fn start_run(pool: &PgPool, new_run: &NewSyncRun) -> Result<SyncRunRow> {
    let row = sqlx::query(
        r#"
 insert into scm.sync_run (repo_id, job_type, status, cursor_before)
 values ($1, $2, 'running', $3)
 returning run_id, repo_id, job_type, started_at
 "#,
    )
    .bind(new_run.repo_id)
    .bind(&new_run.job_type)
    .bind(&new_run.cursor_before)
    .fetch_one(pool)
    .await
    .context("start_run failed")?;

    Ok(SyncRunRow {
            run_id: row.try_get("run_id")?,
            repo_id: row.try_get("repo_id")?,
            job_type: row.try_get("job_type")?,
            started_at: row.try_get("started_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct FinishRun {
    pub run_id: Uuid,
    pub status: String,
    pub items_synced: i64,
    pub items_failed: i64,
    pub total_requests: i64,
    pub total_429_hits: i64,
    pub timeout_count: i64,
    pub error_category: Option<String>,
    pub cursor_after: Option<String>,
}

pub async fn finish_run(pool: &PgPool, finish: &FinishRun) -> Result<()> {
    sqlx::query(
        r#"
 update scm.sync_run
 set ended_at = now(),
 status = $2,
 items_synced = $3,
 items_failed = $4,
 total_requests = $5,
 total_429_hits = $6,
 timeout_count = $7,
 error_category = $8,
 cursor_after = $9
 where run_id = $1
 "#,
    )
    .bind(finish.run_id)
    .bind(&finish.status)
    .bind(finish.items_synced)
    .bind(finish.items_failed)
    .bind(finish.total_requests)
    .bind(finish.total_429_hits)
    .bind(finish.timeout_count)
    .bind(&finish.error_category)
    .bind(&finish.cursor_after)
    .execute(pool)
    .await
    .context("finish_run failed")?;

    Ok(())
}

pub async fn recent_runs(pool: &PgPool, repo_id: Uuid, job_type: &str, limit: i64) -> Result<Vec<SyncRunRow>> {
    let rows = sqlx::query(
        r#"
 select run_id, repo_id, job_type, started_at
 from scm.sync_run
 where repo_id = $1 and job_type = $2
 order by started_at desc
 limit $3
 "#,
    )
    .bind(repo_id)
    .bind(job_type)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("recent_runs failed")?;

    rows.into_iter()
    .map(|row| {
            Ok(SyncRunRow {
                    run_id: row.try_get("run_id")?,
                    repo_id: row.try_get("repo_id")?,
                    job_type: row.try_get("job_type")?,
                    started_at: row.try_get("started_at")?,
            })
    })
    .collect()
}

/// Count of jobs in `pending` or `running` state, for ops-surface gauges.
pub async fn count_queued(pool: &PgPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from scm.sync_job where status in ('pending', 'running')",
    )
    .fetch_one(pool)
    .await
    .context("count_queued failed")?;

    Ok(count)
}
