//! `ScmAdapter`, the pluggable boundary to a concrete source-control
//! system. Concrete adapters (GitLab, SVN) are out of scope; this crate
//! owns the queue, scheduler, planner, and runner that drive whatever
//! adapter is wired in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub author: String,
    pub authored_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequestRecord {
    pub id: String,
    pub title: String,
    pub author: String,
    pub updated_at: DateTime<Utc>,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub mr_id: String,
    pub reviewer: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Window {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterStats {
    pub total_requests: u64,
    pub total_429_hits: u64,
    pub timeout_count: u64,
    pub last_retry_after: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ScmAdapter: Send + Sync {
    async fn fetch_commits(
        &self,
        cursor: Option<&str>,
        window: Window,
        batch_size: u32,
    ) -> anyhow::Result<Page<CommitRecord>>;

    async fn fetch_merge_requests(
        &self,
        cursor: Option<&str>,
        window: Window,
        batch_size: u32,
    ) -> anyhow::Result<Page<MergeRequestRecord>>;

    async fn fetch_reviews(&self, mr_id: &str) -> anyhow::Result<Vec<ReviewEvent>>;

    fn stats(&self) -> AdapterStats;

    fn notify_rate_limit(&self, retry_after: Option<DateTime<Utc>>, reset_time: Option<DateTime<Utc>>);
}
