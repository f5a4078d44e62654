//! `governance.settings`, one row per project, created on first read.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct SettingsRow {
    pub project_key: String,
    pub team_write_enabled: bool,
    pub policy_json: Value,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Reads settings for `project_key`, creating a default row
/// (`team_write_enabled=false`, `policy_json={}`) if none exists yet.
///
/// Uses `insert.. on conflict do nothing` followed by a read rather than
/// read-then-insert, so concurrent first-readers never race to create two
/// rows for the same project.
pub async fn get_or_create_settings(pool: &PgPool, project_key: &str) -> Result<SettingsRow> {
    sqlx::query(
        r#"
 insert into governance.settings (project_key, team_write_enabled, policy_json, updated_at)
 values ($1, false, '{}'::jsonb, now())
 on conflict (project_key) do nothing
 "#,
    )
    .bind(project_key)
    .execute(pool)
    .await
    .context("get_or_create_settings: insert failed")?;

    let row = sqlx::query(
        r#"
 select project_key, team_write_enabled, policy_json, updated_by, updated_at
 from governance.settings
 where project_key = $1
 "#,
    )
    .bind(project_key)
    .fetch_one(pool)
    .await
    .context("get_or_create_settings: read-back failed")?;

    Ok(SettingsRow {
            project_key: row.try_get("project_key")?,
            team_write_enabled: row.try_get("team_write_enabled")?,
            policy_json: row.try_get("policy_json")?,
            updated_by: row.try_get("updated_by")?,
            updated_at: row.try_get("updated_at")?,
    })
}

/// Shallow-merges `policy_patch` into the stored `policy_json` and updates
/// `team_write_enabled` if `Some`. Used by the governance-update operation,
/// which the caller is responsible for authorizing before calling this.
pub async fn update_settings(
    pool: &PgPool,
    project_key: &str,
    team_write_enabled: Option<bool>,
    policy_patch: Option<Value>,
    updated_by: &str,
) -> Result<SettingsRow> {
    let current = get_or_create_settings(pool, project_key).await?;

    let merged_policy = match policy_patch {
        Some(Value::Object(patch)) => {
            let mut merged = current
            .policy_json
            .as_object()
            .cloned()
            .unwrap_or_default();
            for (k, v) in patch {
                merged.insert(k, v);
            }
            Value::Object(merged)
        }
        Some(other) => other,
        None => current.policy_json,
    };
    let team_write_enabled = team_write_enabled.unwrap_or(current.team_write_enabled);

    let row = sqlx::query(
        r#"
 update governance.settings
 set team_write_enabled = $2,
 policy_json = $3,
 updated_by = $4,
 updated_at = now()
 where project_key = $1
 returning project_key, team_write_enabled, policy_json, updated_by, updated_at
 "#,
    )
    .bind(project_key)
    .bind(team_write_enabled)
    .bind(&merged_policy)
    .bind(updated_by)
    .fetch_one(pool)
    .await
    .context("update_settings failed")?;

    Ok(SettingsRow {
            project_key: row.try_get("project_key")?,
            team_write_enabled: row.try_get("team_write_enabled")?,
            policy_json: row.try_get("policy_json")?,
            updated_by: row.try_get("updated_by")?,
            updated_at: row.try_get("updated_at")?,
    })
}
