//! Audit-row construction and lookup on top of `engram_db::audit`.
//!
//! The write trail is a flat append-only table
//! (`governance.write_audit`), not a hash chain: each decision produces
//! exactly one row, and correctness is checked by querying the table, not
//! by replaying a chain.

use anyhow::Result;
use chrono::{DateTime, Utc};
use engram_db::audit::{self, AuditRow, NewAuditRow};
use engram_schemas::{AttemptId, AuditAction, CorrelationId, EvidenceRefs};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

/// `SHA-256(payload_md)` as lowercase hex, the dedup and audit join key.
pub fn payload_sha(payload_md: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload_md.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_user_id: Option<String>,
    pub target_space: String,
    pub action: AuditAction,
    pub reason: String,
    pub payload_sha: Option<String>,
    pub evidence: EvidenceRefs,
}

impl AuditEntry {
    pub fn new(target_space: impl Into<String>, action: AuditAction, reason: impl Into<String>) -> Self {
        Self {
            actor_user_id: None,
            target_space: target_space.into(),
            action,
            reason: reason.into(),
            payload_sha: None,
            evidence: EvidenceRefs::default(),
        }
    }

    pub fn actor(mut self, actor_user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(actor_user_id.into());
        self
    }

    pub fn payload_sha(mut self, sha: impl Into<String>) -> Self {
        self.payload_sha = Some(sha.into());
        self
    }

    pub fn evidence(mut self, evidence: EvidenceRefs) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.evidence.extra.insert(
            "correlation_id".to_string(),
            Value::String(correlation_id.0.to_string()),
        );
        self
    }

    pub fn attempt(mut self, attempt_id: AttemptId) -> Self {
        self.evidence = self.evidence.with_attempt(attempt_id);
        self
    }
}

/// Emits an audit row. Per the resolved open question on audit durability:
/// if the insert fails for a reason other than a constraint conflict (pool
/// exhaustion, connection drop), the caller logs and proceeds rather than
/// blocking the write path on the audit trail's own availability. The
/// governed decision has already been made and must not be undone by an
/// audit-side failure.
pub async fn emit(pool: &PgPool, entry: AuditEntry) -> Result<i64> {
    let row = NewAuditRow {
        actor_user_id: entry.actor_user_id,
        target_space: entry.target_space,
        action: entry.action.as_str(),
        reason: entry.reason,
        payload_sha: entry.payload_sha,
        evidence_refs_json: serde_json::to_value(&entry.evidence)?,
    };
    audit::insert_audit(pool, &row).await
}

pub async fn find_by_payload_sha(pool: &PgPool, payload_sha: &str) -> Result<Vec<AuditRow>> {
    audit::find_by_payload_sha(pool, payload_sha).await
}

pub async fn find_by_outbox_id(pool: &PgPool, outbox_id: i64) -> Result<Vec<AuditRow>> {
    audit::find_by_outbox_id(pool, outbox_id).await
}

/// `evidence_refs_json.extra.correlation_id` is not indexed, so this scans
/// audit rows in a bounded recent window and filters in process. Fine for
/// operator debugging; not a hot path.
pub async fn find_by_correlation_id(
    pool: &PgPool,
    correlation_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<AuditRow>> {
    let rows: Vec<AuditRow> = sqlx::query_as::<_, (i64, DateTime<Utc>, Option<String>, String, String, String, Option<String>, Value)>(
        r#"
 select audit_id, ts, actor_user_id, target_space, action, reason, payload_sha, evidence_refs_json
 from governance.write_audit
 where ts >= $1
 order by ts desc
 "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(audit_id, ts, actor_user_id, target_space, action, reason, payload_sha, evidence_refs_json)| AuditRow {
            audit_id,
            ts,
            actor_user_id,
            target_space,
            action,
            reason,
            payload_sha,
            evidence_refs_json,
    })
    .filter(|row| {
            row.evidence_refs_json
            .get("extra")
            .and_then(|extra| extra.get("correlation_id"))
            .and_then(Value::as_str)
            == Some(correlation_id)
    })
    .collect();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_sha_is_lowercase_64_hex() {
        let sha = payload_sha("# Hi");
        assert_eq!(sha.len(), 64);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn payload_sha_is_stable_for_the_same_bytes() {
        assert_eq!(payload_sha("abc"), payload_sha("abc"));
        assert_ne!(payload_sha("abc"), payload_sha("abd"));
    }
}
