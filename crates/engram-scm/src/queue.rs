//! Thin wrapper over `engram_db::scm` presenting the job-queue operations,
//! keeping the guarded-transition SQL in the store crate and
//! the policy (backoff seconds, jitter) here.

use chrono::{DateTime, Utc};
use engram_db::scm::{self, SyncJobRow};
use engram_schemas::{JobType, SyncMode};
use rand::Rng;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Returns `None` when a non-terminal row for the `(repo_id, job_type,
/// mode)` family already exists; enqueue is a no-op in that case rather
/// than an error.
pub async fn enqueue(
    pool: &PgPool,
    repo_id: Uuid,
    job_type: JobType,
    mode: SyncMode,
    priority: i32,
    payload: Value,
) -> Result<SyncJobRow, SchedulerError> {
    Ok(scm::enqueue_job(pool, repo_id, job_type.as_str(), mode.as_str(), priority, payload).await?)
}

/// Claims at most one job, applying tenant-fair rotation when
/// `tenant_fairness_max_per_round` is set. The dispatcher loop calls this
/// repeatedly; fairness emerges across calls, not within one.
pub async fn claim_one(
    pool: &PgPool,
    worker_id: &str,
    tenant_fairness_max_per_round: Option<i64>,
) -> Result<Option<SyncJobRow>, SchedulerError> {
    let claimed = scm::claim_batch(pool, 1, worker_id, tenant_fairness_max_per_round).await?;
    Ok(claimed.into_iter().next())
}

pub async fn ack(pool: &PgPool, job_id: Uuid, worker_id: &str, run_id: Uuid) -> Result<bool, SchedulerError> {
    Ok(scm::ack(pool, job_id, worker_id, run_id).await?)
}

/// `backoff_seconds` is the caller's policy input (typically the
/// degradation controller's `sleep_seconds`); this only turns it into
/// `not_before`.
pub async fn fail_retry(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
    error: &str,
    backoff_seconds: f64,
    run_id: Option<Uuid>,
) -> Result<bool, SchedulerError> {
    let not_before = Utc::now() + chrono::Duration::milliseconds((backoff_seconds * 1000.0) as i64);
    Ok(scm::fail_retry(pool, job_id, worker_id, error, not_before, run_id).await?)
}

pub async fn mark_dead(pool: &PgPool, job_id: Uuid, worker_id: &str, error: &str) -> Result<bool, SchedulerError> {
    Ok(scm::mark_dead(pool, job_id, worker_id, error).await?)
}

pub async fn renew_lease(pool: &PgPool, job_id: Uuid, worker_id: &str) -> Result<bool, SchedulerError> {
    Ok(scm::renew_lease(pool, job_id, worker_id).await?)
}

/// `jitter_seconds` lets the caller avoid a thundering herd of requeues
/// landing on the same `not_before`.
pub async fn requeue_without_penalty(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
    jitter_seconds: f64,
) -> Result<bool, SchedulerError> {
    let requeued = scm::requeue_without_penalty(pool, job_id, worker_id).await?;
    if requeued && jitter_seconds > 0.0 {
        let jitter = rand::thread_rng().gen_range(0.0..jitter_seconds);
        let not_before: DateTime<Utc> = Utc::now() + chrono::Duration::milliseconds((jitter * 1000.0) as i64);
        // Best-effort: the base requeue already landed; a failure to push
        // not_before out further just means the job is claimable sooner.
        let _ = sqlx::query("update scm.sync_job set not_before = $2 where job_id = $1")
        .bind(job_id)
        .bind(not_before)
        .execute(pool)
        .await;
    }
    Ok(requeued)
}
