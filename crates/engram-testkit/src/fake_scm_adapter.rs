//! Deterministic fake `ScmAdapter`, no network I/O. Pages through
//! in-memory fixtures the test supplies up front, the way `PaperBroker`
//! replays a fixed fill sequence instead of talking to a real broker.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engram_scm::{AdapterStats, CommitRecord, MergeRequestRecord, Page, ReviewEvent, ScmAdapter, Window};

#[derive(Default)]
pub struct FakeScmAdapter {
    commits: Vec<CommitRecord>,
    merge_requests: Vec<MergeRequestRecord>,
    reviews: Vec<ReviewEvent>,
    stats: Mutex<AdapterStats>,
    rate_limit_notifications: Mutex<u32>,
}

impl FakeScmAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commits(mut self, commits: Vec<CommitRecord>) -> Self {
        self.commits = commits;
        self
    }

    pub fn with_merge_requests(mut self, mrs: Vec<MergeRequestRecord>) -> Self {
        self.merge_requests = mrs;
        self
    }

    pub fn with_reviews(mut self, reviews: Vec<ReviewEvent>) -> Self {
        self.reviews = reviews;
        self
    }

    /// Number of times `notify_rate_limit` has been called.
    pub fn rate_limit_notifications(&self) -> u32 {
        *self.rate_limit_notifications.lock().unwrap()
    }
}

/// Cursor is the stringified offset into the fixture slice; `None` starts
/// from the beginning.
fn paginate<T: Clone>(items: &[T], cursor: Option<&str>, batch_size: u32) -> Page<T> {
    let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
    let end = (start + batch_size as usize).min(items.len());
    let next_cursor = if end < items.len() { Some(end.to_string()) } else { None };
    Page {
        items: items.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
        next_cursor,
    }
}

#[async_trait]
impl ScmAdapter for FakeScmAdapter {
    async fn fetch_commits(&self, cursor: Option<&str>, _window: Window, batch_size: u32) -> anyhow::Result<Page<CommitRecord>> {
        self.stats.lock().unwrap().total_requests += 1;
        Ok(paginate(&self.commits, cursor, batch_size))
    }

    async fn fetch_merge_requests(&self, cursor: Option<&str>, _window: Window, batch_size: u32) -> anyhow::Result<Page<MergeRequestRecord>> {
        self.stats.lock().unwrap().total_requests += 1;
        Ok(paginate(&self.merge_requests, cursor, batch_size))
    }

    async fn fetch_reviews(&self, mr_id: &str) -> anyhow::Result<Vec<ReviewEvent>> {
        self.stats.lock().unwrap().total_requests += 1;
        Ok(self.reviews.iter().filter(|r| r.mr_id == mr_id).cloned().collect())
    }

    fn stats(&self) -> AdapterStats {
        self.stats.lock().unwrap().clone()
    }

    fn notify_rate_limit(&self, retry_after: Option<DateTime<Utc>>, _reset_time: Option<DateTime<Utc>>) {
        *self.rate_limit_notifications.lock().unwrap() += 1;
        let mut stats = self.stats.lock().unwrap();
        stats.total_429_hits += 1;
        stats.last_retry_after = retry_after;
    }
}
