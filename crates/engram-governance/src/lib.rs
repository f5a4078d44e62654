//! Write-governance pipeline: the SINGLE entry point through which
//! every governed memory write flows: actor resolution, dedup, policy,
//! delivery, audit. Nothing downstream of `GovernanceWriter::write` talks
//! to the memory service or the outbox directly.

pub mod actor;
pub mod policy;

use chrono::Utc;
use engram_audit::{payload_sha, AuditEntry};
use engram_db::{outbox, settings};
use engram_memory_client::{AddMemoryRequest, MemoryClientError, MemoryServiceClient};
use engram_schemas::{AuditAction, CorrelationId, EvidenceRefs, UnknownActorPolicy};
use serde_json::Value;
use sqlx::PgPool;

use crate::actor::ActorResolution;
use crate::policy::{self, BulkMode, PolicyAction, PolicySettings, WriteRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcomeAction {
    Allow,
    Redirect,
    Reject,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WriteOutcome {
    pub ok: bool,
    pub action: WriteOutcomeAction,
    pub space_written: Option<String>,
    pub memory_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriteInput {
    pub payload_md: String,
    pub target_space: Option<String>,
    pub meta: Option<Value>,
    pub kind: Option<String>,
    pub evidence_refs: Option<Vec<String>>,
    pub is_bulk: bool,
    pub item_id: Option<String>,
    pub actor_user_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("admin authorization failed")]
    Unauthorized,
}

/// Reads `governance.settings` and translates the stored row into the
/// pure-decision-tree's `PolicySettings`.
fn policy_settings_from_row(row: &settings::SettingsRow) -> PolicySettings {
    let policy_json = row.policy_json.as_object();
    let get_vec = |key: &str| -> Vec<String> {
        policy_json
        .and_then(|o| o.get(key))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
    };

    let allowed_kinds = get_vec("allowed_kinds");
    let bulk_mode = match policy_json.and_then(|o| o.get("bulk_mode")).and_then(Value::as_str) {
        Some("reject") => BulkMode::Reject,
        Some("allow") => BulkMode::Allow,
        _ => BulkMode::VeryShort,
    };

    PolicySettings {
        team_write_enabled: row.team_write_enabled,
        allowlist_users: get_vec("allowlist_users"),
        allowed_kinds: if allowed_kinds.is_empty() { PolicySettings::default().allowed_kinds } else { allowed_kinds },
        require_evidence: policy_json.and_then(|o| o.get("require_evidence")).and_then(Value::as_bool).unwrap_or(true),
        max_chars: policy_json.and_then(|o| o.get("max_chars")).and_then(Value::as_u64).map(|n| n as usize).unwrap_or(1200),
        bulk_mode,
    }
}

fn project_key_from_space(target_space: &str) -> String {
    target_space.strip_prefix("team:").unwrap_or(target_space).to_string()
}

pub struct GovernanceWriter<'a> {
    pool: &'a PgPool,
    memory_client: &'a dyn MemoryServiceClient,
    unknown_actor_policy: UnknownActorPolicy,
}

impl<'a> GovernanceWriter<'a> {
    pub fn new(pool: &'a PgPool, memory_client: &'a dyn MemoryServiceClient, unknown_actor_policy: UnknownActorPolicy) -> Self {
        Self { pool, memory_client, unknown_actor_policy }
    }

    pub async fn write(&self, input: WriteInput) -> Result<WriteOutcome, GovernanceError> {
        let correlation_id = CorrelationId::new();
        let span = tracing::info_span!("governance_write", correlation_id = %correlation_id.0);
        let _enter = span.enter();

        let sha = payload_sha(&input.payload_md);
        let default_project_key = "default".to_string();
        let mut target_space = input
        .target_space
        .clone()
        .unwrap_or_else(|| format!("team:{default_project_key}"));

        // 2. Actor resolution.
        let resolution = actor::resolve(self.pool, input.actor_user_id.as_deref(), self.unknown_actor_policy).await;
        let actor_user_id = match resolution {
            ActorResolution::Known { user_id, auto_created } => {
                if auto_created {
                    self.audit(
                        AuditEntry::new(target_space.as_str(), AuditAction::Allow, "ACTOR_AUTOCREATED")
                        .actor(user_id.as_str())
                        .payload_sha(sha.as_str())
                        .correlation(correlation_id),
                    )
                    .await;
                }
                Some(user_id)
            }
            ActorResolution::Degraded { redirected_space } => {
                self.audit(
                    AuditEntry::new(target_space.as_str(), AuditAction::Redirect, "ACTOR_UNKNOWN_DEGRADE")
                    .payload_sha(sha.as_str())
                    .correlation(correlation_id),
                )
                .await;
                target_space = redirected_space;
                input.actor_user_id.clone()
            }
            ActorResolution::Rejected { reason } => {
                self.audit(
                    AuditEntry::new(target_space.as_str(), AuditAction::Reject, reason)
                    .payload_sha(sha.as_str())
                    .correlation(correlation_id),
                )
                .await;
                return Ok(WriteOutcome {
                        ok: false,
                        action: WriteOutcomeAction::Reject,
                        space_written: None,
                        memory_id: None,
                        message: Some(reason.to_string()),
                });
            }
        };

        // 3. Dedup.
        if let Ok(Some(prior)) = outbox::find_sent_by_dedup_key(self.pool, &target_space, &sha).await {
            let memory_id = prior.last_error.as_deref().and_then(|s| s.strip_prefix("memory_id=")).map(str::to_string);
            self.audit(
                AuditEntry::new(target_space.as_str(), AuditAction::Allow, "DEDUP_HIT")
                .actor(actor_user_id.clone().unwrap_or_default())
                .payload_sha(sha.as_str())
                .correlation(correlation_id),
            )
            .await;
            return Ok(WriteOutcome {
                    ok: true,
                    action: WriteOutcomeAction::Allow,
                    space_written: Some(target_space),
                    memory_id,
                    message: None,
            });
        }

        // 4. Policy.
        let project_key = project_key_from_space(&target_space);
        let settings_row = settings::get_or_create_settings(self.pool, &project_key).await?;
        let policy_settings = policy_settings_from_row(&settings_row);

        let decision = policy::decide(
            &policy_settings,
            &WriteRequest {
                target_space: &target_space,
                actor_user_id: actor_user_id.as_deref(),
                payload_md: &input.payload_md,
                kind: input.kind.as_deref(),
                evidence_refs_present: input.evidence_refs.as_ref().map(|v| !v.is_empty()).unwrap_or(false),
                is_bulk: input.is_bulk,
            },
        );

        if decision.action == PolicyAction::Reject {
            self.audit(
                AuditEntry::new(decision.original_space.as_str(), AuditAction::Reject, decision.reason.as_str())
                .actor(actor_user_id.clone().unwrap_or_default())
                .payload_sha(sha.as_str())
                .correlation(correlation_id),
            )
            .await;
            return Ok(WriteOutcome {
                    ok: false,
                    action: WriteOutcomeAction::Reject,
                    space_written: None,
                    memory_id: None,
                    message: Some(decision.reason),
            });
        }

        // 5. Deliver.
        let delivery = self
        .memory_client
        .add_memory(AddMemoryRequest {
                content: input.payload_md.clone(),
                user_id: actor_user_id.clone(),
                tags: input.kind.clone().into_iter().collect(),
                metadata: input.meta.clone().unwrap_or(Value::Null),
        })
        .await;

        let audit_action = match decision.action {
            PolicyAction::Allow => AuditAction::Allow,
            PolicyAction::Redirect => AuditAction::Redirect,
            PolicyAction::Reject => unreachable!("handled above"),
        };

        match delivery {
            Ok(response) => {
                self.audit(
                    AuditEntry::new(decision.final_space.as_str(), audit_action, decision.reason.as_str())
                    .actor(actor_user_id.unwrap_or_default())
                    .payload_sha(sha.as_str())
                    .evidence(EvidenceRefs { memory_id: Some(response.id.clone()),..EvidenceRefs::default() })
                    .correlation(correlation_id),
                )
                .await;

                Ok(WriteOutcome {
                        ok: true,
                        action: match decision.action {
                            PolicyAction::Allow => WriteOutcomeAction::Allow,
                            PolicyAction::Redirect => WriteOutcomeAction::Redirect,
                            PolicyAction::Reject => unreachable!(),
                        },
                        space_written: Some(decision.final_space),
                        memory_id: Some(response.id),
                        message: None,
                })
            }
            Err(err) => {
                let outbox_id = outbox::enqueue(self.pool, input.item_id.as_deref(), &decision.final_space, &input.payload_md, &sha, Utc::now()).await?;

                let reason = format!("openmemory_write_failed:{}", error_code(&err));
                self.audit(
                    AuditEntry::new(decision.final_space.as_str(), AuditAction::Redirect, reason.as_str())
                    .actor(actor_user_id.unwrap_or_default())
                    .payload_sha(sha.as_str())
                    .evidence(EvidenceRefs { outbox_id: Some(outbox_id),..EvidenceRefs::default() })
                    .correlation(correlation_id),
                )
                .await;

                Ok(WriteOutcome {
                        ok: true,
                        action: WriteOutcomeAction::Redirect,
                        space_written: Some(decision.final_space),
                        memory_id: None,
                        message: Some(reason),
                })
            }
        }
    }

    /// Merges `policy_patch` and `team_write_enabled` for `project_key`.
    /// Authorized by `admin_key` matching the configured admin secret, or
    /// `actor_user_id` already being in the allowlist. An audit row is
    /// emitted regardless of outcome.
    pub async fn update_governance(
        &self,
        project_key: &str,
        admin_key: Option<&str>,
        configured_admin_key: &str,
        actor_user_id: Option<&str>,
        team_write_enabled: Option<bool>,
        policy_patch: Option<Value>,
    ) -> Result<settings::SettingsRow, GovernanceError> {
        let current = settings::get_or_create_settings(self.pool, project_key).await?;
        let policy_settings = policy_settings_from_row(&current);

        let authorized = admin_key.map(|k| k == configured_admin_key).unwrap_or(false)
        || actor_user_id.map(|u| policy_settings.allowlist_users.iter().any(|a| a == u)).unwrap_or(false);

        let space = format!("team:{project_key}");
        if !authorized {
            self.audit(AuditEntry::new(space.as_str(), AuditAction::Reject, "governance_update_unauthorized").actor(actor_user_id.unwrap_or_default())).await;
            return Err(GovernanceError::Unauthorized);
        }

        let updated = settings::update_settings(self.pool, project_key, team_write_enabled, policy_patch, actor_user_id.unwrap_or("admin")).await?;

        self.audit(AuditEntry::new(space.as_str(), AuditAction::Allow, "governance_updated").actor(actor_user_id.unwrap_or_default())).await;

        Ok(updated)
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = engram_audit::emit(self.pool, entry).await {
            tracing::warn!(error = %e, "audit emit failed");
        }
    }
}

fn error_code(err: &MemoryClientError) -> String {
    match err {
        MemoryClientError::Connection(_) => "connection".to_string(),
        MemoryClientError::Api { status,.. } => status.to_string(),
    }
}
