//! Actor resolution: decides what happens when
//! `actor_user_id` does not resolve to a known `identity.actor` row.

use engram_db::actor;
use engram_schemas::UnknownActorPolicy;
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub enum ActorResolution {
    /// Actor is known, or was auto-created; the original `target_space`
    /// (and audit action `allow` for auto-create) stands.
    Known { user_id: String, auto_created: bool },
    /// `degrade` policy: actor is unknown, request is rerouted to
    /// `private:unknown` and continues.
    Degraded { redirected_space: String },
    /// `reject` policy, or `auto_create` that failed: request stops here.
    Rejected { reason: &'static str },
}

/// `actor_user_id = None` is always unknown, regardless of policy; there
/// is nothing to look up.
pub async fn resolve(pool: &PgPool, actor_user_id: Option<&str>, policy: UnknownActorPolicy) -> ActorResolution {
    let Some(user_id) = actor_user_id else {
        return resolve_unknown(policy, None).await;
    };

    match actor::find(pool, user_id).await {
        Ok(Some(row)) => ActorResolution::Known { user_id: row.user_id, auto_created: false },
        Ok(None) => resolve_unknown_for(pool, policy, user_id).await,
        Err(e) => {
            tracing::warn!(error = %e, "actor lookup failed, treating as unknown");
            resolve_unknown_for(pool, policy, user_id).await
        }
    }
}

async fn resolve_unknown(policy: UnknownActorPolicy, _user_id: Option<&str>) -> ActorResolution {
    match policy {
        UnknownActorPolicy::Reject => ActorResolution::Rejected { reason: "ACTOR_UNKNOWN_REJECT" },
        UnknownActorPolicy::Degrade => ActorResolution::Degraded { redirected_space: "private:unknown".to_string() },
        UnknownActorPolicy::AutoCreate => ActorResolution::Rejected { reason: "ACTOR_AUTOCREATE_FAILED" },
    }
}

async fn resolve_unknown_for(pool: &PgPool, policy: UnknownActorPolicy, user_id: &str) -> ActorResolution {
    match policy {
        UnknownActorPolicy::Reject => ActorResolution::Rejected { reason: "ACTOR_UNKNOWN_REJECT" },
        UnknownActorPolicy::Degrade => ActorResolution::Degraded { redirected_space: format!("private:{user_id}") },
        UnknownActorPolicy::AutoCreate => match actor::find_or_create(pool, user_id, None).await {
            Ok(row) => ActorResolution::Known { user_id: row.user_id, auto_created: true },
            Err(e) => {
                tracing::warn!(error = %e, "actor auto-create failed");
                ActorResolution::Rejected { reason: "ACTOR_AUTOCREATE_FAILED" }
            }
        },
    }
}
