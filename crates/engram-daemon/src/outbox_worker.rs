//! Outbox dispatch loop: claims due rows, delivers them to the
//! memory service, and transitions each row guarded by `(outbox_id,
//! locked_by)` so a stolen lease never produces two successful deliveries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engram_audit::AuditEntry;
use engram_config::OutboxConfig;
use engram_db::outbox::{self, OutboxRow};
use engram_memory_client::{AddMemoryRequest, MemoryServiceClient};
use engram_schemas::{reason, AttemptId, AuditAction, CorrelationId, EvidenceRefs};
use serde_json::Value;
use sqlx::PgPool;

pub struct OutboxWorker {
    pool: PgPool,
    memory_client: Arc<dyn MemoryServiceClient>,
    cfg: OutboxConfig,
}

impl OutboxWorker {
    pub fn new(pool: PgPool, memory_client: Arc<dyn MemoryServiceClient>, cfg: OutboxConfig) -> Self {
        Self { pool, memory_client, cfg }
    }

    /// Claims and drains one batch. Returns the number of rows claimed.
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let claimed = outbox::claim_batch(&self.pool, self.cfg.batch_size as i64, &self.cfg.worker_id, self.cfg.lease_seconds).await?;
        let n = claimed.len();
        for row in claimed {
            self.process_row(row).await;
        }
        Ok(n)
    }

    /// Runs `run_once` on `poll_interval` until the process exits. A failed
    /// sweep is logged and retried on the next tick rather than stopping
    /// the loop.
    pub async fn run_loop(&self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(claimed = n, "outbox sweep processed rows"),
                Err(e) => tracing::warn!(error = %e, "outbox sweep failed"),
            }
        }
    }

    async fn process_row(&self, row: OutboxRow) {
        let correlation_id = CorrelationId::new();
        let attempt_id = AttemptId::new();
        let span = tracing::info_span!(
            "outbox_dispatch",
            outbox_id = row.outbox_id,
            correlation_id = %correlation_id.0,
            attempt_id = %attempt_id.0,
        );
        let _enter = span.enter();

        match outbox::find_sent_by_dedup_key(&self.pool, &row.target_space, &row.payload_sha).await {
            Ok(Some(prior)) if prior.outbox_id != row.outbox_id => {
                self.handle_dedup_hit(&row, &prior, correlation_id, attempt_id).await;
                return;
            }
            Err(e) => tracing::warn!(outbox_id = row.outbox_id, error = %e, "dedup lookup failed, proceeding to deliver"),
            _ => {}
        }

        if let Err(e) = outbox::renew_lease(&self.pool, row.outbox_id, &self.cfg.worker_id).await {
            tracing::warn!(outbox_id = row.outbox_id, error = %e, "lease renewal before delivery failed");
        }

        let delivery = self
        .memory_client
        .add_memory(AddMemoryRequest {
                content: row.payload_md.clone(),
                user_id: None,
                tags: Vec::new(),
                metadata: Value::Null,
        })
        .await;

        if let Err(e) = outbox::renew_lease(&self.pool, row.outbox_id, &self.cfg.worker_id).await {
            tracing::warn!(outbox_id = row.outbox_id, error = %e, "lease renewal before transition failed");
        }

        match delivery {
            Ok(response) => self.finalize_success(&row, &response.id, correlation_id, attempt_id).await,
            Err(e) => self.finalize_failure(&row, &e.to_string(), correlation_id, attempt_id).await,
        }
    }

    async fn handle_dedup_hit(&self, row: &OutboxRow, prior: &OutboxRow, correlation_id: CorrelationId, attempt_id: AttemptId) {
        let memory_id = prior
        .last_error
        .as_deref()
        .and_then(|s| s.strip_prefix("memory_id="))
        .unwrap_or_default();

        match outbox::mark_sent_as_dedup(&self.pool, row.outbox_id, &self.cfg.worker_id, memory_id).await {
            Ok(true) => {
                self.audit(
                    AuditEntry::new(row.target_space.as_str(), AuditAction::Allow, reason::OUTBOX_FLUSH_DEDUP_HIT)
                    .payload_sha(row.payload_sha.as_str())
                    .evidence(EvidenceRefs {
                            outbox_id: Some(row.outbox_id),
                            memory_id: Some(memory_id.to_string()),
                            original_outbox_id: Some(prior.outbox_id),
                            ..EvidenceRefs::default()
                    })
                    .correlation(correlation_id)
                    .attempt(attempt_id),
                )
                .await;
            }
            Ok(false) => self.audit_conflict(row, correlation_id, attempt_id, "mark_sent_as_dedup").await,
            Err(e) => self.audit_db_error(row, &e, correlation_id, attempt_id).await,
        }
    }

    async fn finalize_success(&self, row: &OutboxRow, memory_id: &str, correlation_id: CorrelationId, attempt_id: AttemptId) {
        match outbox::mark_sent(&self.pool, row.outbox_id, &self.cfg.worker_id, memory_id).await {
            Ok(true) => {
                self.audit(
                    AuditEntry::new(row.target_space.as_str(), AuditAction::Allow, reason::OUTBOX_FLUSH_SUCCESS)
                    .payload_sha(row.payload_sha.as_str())
                    .evidence(EvidenceRefs {
                            outbox_id: Some(row.outbox_id),
                            memory_id: Some(memory_id.to_string()),
                            ..EvidenceRefs::default()
                    })
                    .correlation(correlation_id)
                    .attempt(attempt_id),
                )
                .await;
            }
            Ok(false) => self.audit_conflict(row, correlation_id, attempt_id, "mark_sent").await,
            Err(e) => self.audit_db_error(row, &e, correlation_id, attempt_id).await,
        }
    }

    async fn finalize_failure(&self, row: &OutboxRow, error_message: &str, correlation_id: CorrelationId, attempt_id: AttemptId) {
        let next_retry_count = row.retry_count as u32 + 1;

        if next_retry_count >= self.cfg.max_retries {
            match outbox::mark_dead(&self.pool, row.outbox_id, &self.cfg.worker_id, error_message).await {
                Ok(true) => {
                    self.audit(
                        AuditEntry::new(row.target_space.as_str(), AuditAction::Reject, reason::OUTBOX_FLUSH_DEAD)
                        .payload_sha(row.payload_sha.as_str())
                        .evidence(EvidenceRefs { outbox_id: Some(row.outbox_id),..EvidenceRefs::default() })
                        .correlation(correlation_id)
                        .attempt(attempt_id),
                    )
                    .await;
                }
                Ok(false) => self.audit_conflict(row, correlation_id, attempt_id, "mark_dead").await,
                Err(e) => self.audit_db_error(row, &e, correlation_id, attempt_id).await,
            }
            return;
        }

        let next_attempt_at = Utc::now()
        + chrono::Duration::from_std(backoff(
                self.cfg.backoff_base_seconds,
                row.retry_count as u32,
                self.cfg.backoff_jitter_factor,
        ))
        .unwrap_or_else(|_| chrono::Duration::seconds(1));

        match outbox::mark_retry(&self.pool, row.outbox_id, &self.cfg.worker_id, error_message, next_attempt_at).await {
            Ok(true) => {
                self.audit(
                    AuditEntry::new(row.target_space.as_str(), AuditAction::Redirect, reason::OUTBOX_FLUSH_RETRY)
                    .payload_sha(row.payload_sha.as_str())
                    .evidence(EvidenceRefs { outbox_id: Some(row.outbox_id),..EvidenceRefs::default() })
                    .correlation(correlation_id)
                    .attempt(attempt_id),
                )
                .await;
            }
            Ok(false) => self.audit_conflict(row, correlation_id, attempt_id, "mark_retry").await,
            Err(e) => self.audit_db_error(row, &e, correlation_id, attempt_id).await,
        }
    }

    /// Lease stolen, or the row transitioned out from under this attempt
    /// between delivery and the guarded update.
    async fn audit_conflict(&self, row: &OutboxRow, correlation_id: CorrelationId, attempt_id: AttemptId, intended_action: &str) {
        let observed = outbox::fetch(&self.pool, row.outbox_id).await.ok().flatten();

        let mut extra = serde_json::Map::new();
        extra.insert(
            "observed_status".to_string(),
            Value::String(observed.as_ref().map(|r| r.status.clone()).unwrap_or_default()),
        );
        extra.insert(
            "observed_locked_by".to_string(),
            observed
            .as_ref()
            .and_then(|r| r.locked_by.clone())
            .map(Value::String)
            .unwrap_or(Value::Null),
        );
        extra.insert("intended_action".to_string(), Value::String(intended_action.to_string()));

        self.audit(
            AuditEntry::new(row.target_space.as_str(), AuditAction::Redirect, reason::OUTBOX_FLUSH_CONFLICT)
            .payload_sha(row.payload_sha.as_str())
            .evidence(EvidenceRefs {
                    outbox_id: Some(row.outbox_id),
                    extra,
                    ..EvidenceRefs::default()
            })
            .correlation(correlation_id)
            .attempt(attempt_id),
        )
        .await;
    }

    async fn audit_db_error(&self, row: &OutboxRow, err: &anyhow::Error, correlation_id: CorrelationId, attempt_id: AttemptId) {
        let reason = if is_query_canceled(err) {
            reason::OUTBOX_FLUSH_DB_TIMEOUT
        } else {
            reason::OUTBOX_FLUSH_DB_ERROR
        };

        tracing::warn!(outbox_id = row.outbox_id, error = %err, reason, "guarded transition failed");

        self.audit(
            AuditEntry::new(row.target_space.as_str(), AuditAction::Redirect, reason)
            .payload_sha(row.payload_sha.as_str())
            .evidence(EvidenceRefs { outbox_id: Some(row.outbox_id),..EvidenceRefs::default() })
            .correlation(correlation_id)
            .attempt(attempt_id),
        )
        .await;
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = engram_audit::emit(&self.pool, entry).await {
            tracing::warn!(error = %e, "audit emit failed");
        }
    }
}

fn is_query_canceled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
            cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .map(|de| de.code().as_deref() == Some("57014"))
            .unwrap_or(false)
    })
}

fn backoff(base_seconds: f64, retry_count: u32, jitter_factor: f64) -> Duration {
    let delay = base_seconds * 2f64.powi(retry_count as i32);
    let jitter_range = delay * jitter_factor;
    let jitter: f64 = rand::random::<f64>() * (2.0 * jitter_range) - jitter_range;
    Duration::from_secs_f64((delay + jitter).max(0.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_stays_nonnegative() {
        let d0 = backoff(1.0, 0, 0.0);
        let d3 = backoff(1.0, 3, 0.0);
        assert_eq!(d0.as_secs_f64(), 1.0);
        assert_eq!(d3.as_secs_f64(), 8.0);
    }

    #[test]
    fn backoff_jitter_stays_within_requested_band() {
        for retry_count in 0..5 {
            let d = backoff(2.0, retry_count, 0.5);
            let base = 2.0 * 2f64.powi(retry_count as i32);
            assert!(d.as_secs_f64() >= (base * 0.5).max(0.1) - 1e-9);
            assert!(d.as_secs_f64() <= base * 1.5 + 1e-9);
        }
    }
}
