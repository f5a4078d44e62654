//! Shared types passed across the governance, outbox, and SCM-sync crates.
//!
//! Nothing here touches the store or the network; this crate exists so the
//! same enums and newtypes are not redefined independently in each crate.

pub mod reason;
pub mod space;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use space::{SpaceId, SpaceKind};

/// `action` column of a write-audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Allow,
    Redirect,
    Reject,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Allow => "allow",
            AuditAction::Redirect => "redirect",
            AuditAction::Reject => "reject",
        }
    }
}

/// `status` column of `logbook.outbox_memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// `job_type` column of `scm.sync_job`. Concrete SCM adapters are out of
/// scope; this enumerates the job families the queue and scheduler reason
/// about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    GitlabCommits,
    GitlabMrs,
    GitlabReviews,
    Svn,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::GitlabCommits => "gitlab_commits",
            JobType::GitlabMrs => "gitlab_mrs",
            JobType::GitlabReviews => "gitlab_reviews",
            JobType::Svn => "svn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gitlab_commits" => Some(Self::GitlabCommits),
            "gitlab_mrs" => Some(Self::GitlabMrs),
            "gitlab_reviews" => Some(Self::GitlabReviews),
            "svn" => Some(Self::Svn),
            _ => None,
        }
    }
}

/// `mode` column of `scm.sync_job`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Incremental,
    Backfill,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Incremental => "incremental",
            SyncMode::Backfill => "backfill",
        }
    }
}

/// `status` column of `scm.sync_job`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Dead,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// Circuit-breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Wire-level error taxonomy. `recoverable()` distinguishes the set the
/// degradation controller folds back into its own adjustments from the set
/// the outbox/job-queue treat as immediately unrecoverable for this attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimited,
    ServerError,
    Timeout,
    AuthError,
    NetworkError,
    ClientError,
    ContentTooLarge,
    ParseError,
    Unknown,
}

impl ErrorCategory {
    pub fn is_unrecoverable(self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimited
            | ErrorCategory::ServerError
            | ErrorCategory::Timeout
            | ErrorCategory::AuthError
            | ErrorCategory::NetworkError
        )
    }
}

/// Policy applied to actors unknown to `identity.actor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownActorPolicy {
    Reject,
    Degrade,
    AutoCreate,
}

impl UnknownActorPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reject" => Some(Self::Reject),
            "degrade" => Some(Self::Degrade),
            "auto_create" => Some(Self::AutoCreate),
            _ => None,
        }
    }
}

/// Correlates every store operation and audit row produced while servicing
/// one governed write or one outbox attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// One attempt at delivering a single outbox row; distinct from
/// `correlation_id`, which is stable across all attempts of the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

/// Evidence attached to a write-audit row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceRefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_outbox_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EvidenceRefs {
    pub fn with_correlation(correlation_id: CorrelationId) -> Self {
        let mut refs = Self::default();
        refs.extra.insert(
            "correlation_id".to_string(),
            serde_json::Value::String(correlation_id.0.to_string()),
        );
        refs
    }

    pub fn with_attempt(mut self, attempt_id: AttemptId) -> Self {
        self.extra.insert(
            "attempt_id".to_string(),
            serde_json::Value::String(attempt_id.0.to_string()),
        );
        self
    }
}

/// Snapshot of a repository's sync health used by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSyncState {
    pub repo_id: Uuid,
    pub vcs_type: String,
    pub instance_key: Option<String>,
    pub tenant_id: Option<String>,
    pub cursor_updated_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub failed_count: i64,
    pub rate_limit_hits: i64,
    pub total_requests: i64,
    pub last_status: Option<String>,
    pub is_queued: bool,
}
