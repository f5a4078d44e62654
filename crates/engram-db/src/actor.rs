//! `identity.actor`, backing `ActorResolver::resolve`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct ActorRow {
    pub user_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn find(pool: &PgPool, user_id: &str) -> Result<Option<ActorRow>> {
    let row = sqlx::query(
        r#"
 select user_id, display_name, created_at from identity.actor where user_id = $1
 "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("actor find failed")?;

    row.map(row_to_actor).transpose()
}

/// Creates the actor if absent, used by the `auto_create` unknown-actor
/// policy branch.
pub async fn find_or_create(pool: &PgPool, user_id: &str, display_name: Option<&str>) -> Result<ActorRow> {
    sqlx::query(
        r#"
 insert into identity.actor (user_id, display_name)
 values ($1, $2)
 on conflict (user_id) do nothing
 "#,
    )
    .bind(user_id)
    .bind(display_name)
    .execute(pool)
    .await
    .context("actor find_or_create: insert failed")?;

    let row = sqlx::query(
        r#"
 select user_id, display_name, created_at from identity.actor where user_id = $1
 "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("actor find_or_create: read-back failed")?;

    row_to_actor(row)
}

fn row_to_actor(row: sqlx::postgres::PgRow) -> Result<ActorRow> {
    Ok(ActorRow {
            user_id: row.try_get("user_id")?,
            display_name: row.try_get("display_name")?,
            created_at: row.try_get("created_at")?,
    })
}
