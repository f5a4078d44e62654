//! Scenario: `run_incremental` against a fake adapter (no database, no
//! network). Exercises the runner's per-page accounting and its failure
//! mapping, independent of the queue/lease machinery covered elsewhere.

use chrono::Utc;
use engram_scm::runner::run_incremental;
use engram_scm::{CommitRecord, RunStatus, RunnerContext};
use engram_testkit::FakeScmAdapter;
use uuid::Uuid;

fn ctx(job_type: &str) -> RunnerContext {
    RunnerContext {
        repo_id: Uuid::new_v4(),
        repo_label: "example/repo".to_string(),
        job_type: job_type.to_string(),
        dry_run: false,
        verbose: false,
        update_watermark: true,
        window_chunk_hours: 24,
        window_chunk_revs: 500,
        batch_size: 50,
    }
}

#[tokio::test]
async fn successful_page_reports_items_synced() {
    let commits = vec![
        CommitRecord { sha: "a1".to_string(), author: "alice".to_string(), authored_at: Utc::now(), message: "fix".to_string() },
        CommitRecord { sha: "b2".to_string(), author: "bob".to_string(), authored_at: Utc::now(), message: "add".to_string() },
    ];
    let adapter = FakeScmAdapter::new().with_commits(commits);

    let result = run_incremental(&ctx("gitlab_commits"), &adapter, None, Utc::now()).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.items_synced, 2);
    assert!(result.error.is_none());
    assert_eq!(adapter.stats().total_requests, 1);
}

#[tokio::test]
async fn unsupported_job_type_fails_without_calling_the_adapter() {
    let adapter = FakeScmAdapter::new();

    let result = run_incremental(&ctx("unknown_job_type"), &adapter, None, Utc::now()).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.is_some());
    assert_eq!(adapter.stats().total_requests, 0, "adapter must not be called for an unsupported job_type");
}

#[tokio::test]
async fn empty_page_is_still_a_success_with_zero_items() {
    let adapter = FakeScmAdapter::new();

    let result = run_incremental(&ctx("gitlab_commits"), &adapter, None, Utc::now()).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.items_synced, 0);
}
