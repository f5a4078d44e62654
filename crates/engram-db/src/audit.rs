//! `governance.write_audit`, append-only.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct NewAuditRow {
    pub actor_user_id: Option<String>,
    pub target_space: String,
    pub action: &'static str,
    pub reason: String,
    pub payload_sha: Option<String>,
    pub evidence_refs_json: Value,
}

#[derive(Debug, Clone)]
pub struct AuditRow {
    pub audit_id: i64,
    pub ts: DateTime<Utc>,
    pub actor_user_id: Option<String>,
    pub target_space: String,
    pub action: String,
    pub reason: String,
    pub payload_sha: Option<String>,
    pub evidence_refs_json: Value,
}

/// Inserts one audit row. Every terminal outcome of a governed write or
/// outbox-delivery attempt produces exactly one of these.
pub async fn insert_audit(pool: &PgPool, row: &NewAuditRow) -> Result<i64> {
    let rec: (i64,) = sqlx::query_as(
        r#"
 insert into governance.write_audit
 (actor_user_id, target_space, action, reason, payload_sha, evidence_refs_json)
 values ($1, $2, $3, $4, $5, $6)
 returning audit_id
 "#,
    )
    .bind(&row.actor_user_id)
    .bind(&row.target_space)
    .bind(row.action)
    .bind(&row.reason)
    .bind(&row.payload_sha)
    .bind(&row.evidence_refs_json)
    .fetch_one(pool)
    .await
    .context("insert_audit failed")?;

    Ok(rec.0)
}

pub async fn find_by_payload_sha(pool: &PgPool, payload_sha: &str) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query(
        r#"
 select audit_id, ts, actor_user_id, target_space, action, reason, payload_sha, evidence_refs_json
 from governance.write_audit
 where payload_sha = $1
 order by ts asc
 "#,
    )
    .bind(payload_sha)
    .fetch_all(pool)
    .await
    .context("find_by_payload_sha failed")?;

    rows.into_iter().map(row_to_audit).collect()
}

pub async fn find_by_outbox_id(pool: &PgPool, outbox_id: i64) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query(
        r#"
 select audit_id, ts, actor_user_id, target_space, action, reason, payload_sha, evidence_refs_json
 from governance.write_audit
 where (evidence_refs_json->>'outbox_id')::bigint = $1
 order by ts asc
 "#,
    )
    .bind(outbox_id)
    .fetch_all(pool)
    .await
    .context("find_by_outbox_id failed")?;

    rows.into_iter().map(row_to_audit).collect()
}

fn row_to_audit(row: sqlx::postgres::PgRow) -> Result<AuditRow> {
    Ok(AuditRow {
            audit_id: row.try_get("audit_id")?,
            ts: row.try_get("ts")?,
            actor_user_id: row.try_get("actor_user_id")?,
            target_space: row.try_get("target_space")?,
            action: row.try_get("action")?,
            reason: row.try_get("reason")?,
            payload_sha: row.try_get("payload_sha")?,
            evidence_refs_json: row.try_get("evidence_refs_json")?,
    })
}
