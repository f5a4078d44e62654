//! Sync runner. Drives one `ScmAdapter` through a single incremental
//! pass, a loop of passes, or a planned backfill, producing aggregated
//! status the caller maps to an exit code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::{ScmAdapter, Window};
use crate::backfill::{self, BackfillLimits, BackfillWindowExceeded, ChunkPayload};

#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub repo_id: Uuid,
    pub repo_label: String,
    pub job_type: String,
    pub dry_run: bool,
    pub verbose: bool,
    pub update_watermark: bool,
    pub window_chunk_hours: i64,
    pub window_chunk_revs: i64,
    pub batch_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    Skipped,
    Cancelled,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Partial => 1,
            RunStatus::Failed | RunStatus::Skipped | RunStatus::Cancelled => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub phase: String,
    pub repo: String,
    pub job: String,
    pub status: RunStatus,
    pub items_synced: u64,
    pub vfacts_refreshed: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub total_chunks: u32,
    pub success_chunks: u32,
    pub partial_chunks: u32,
    pub failed_chunks: u32,
    pub total_items_synced: u64,
    pub errors: Vec<String>,
    pub watermark_updated: Option<DateTime<Utc>>,
}

impl AggregatedResult {
    pub fn status(&self) -> RunStatus {
        if self.total_chunks == 0 {
            RunStatus::Skipped
        } else if self.success_chunks == self.total_chunks {
            RunStatus::Success
        } else if self.success_chunks + self.partial_chunks == 0 && self.failed_chunks > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

/// Runs a single incremental pass. The adapter's own pagination is not
/// followed to exhaustion here: one page per call, matching the loop-mode
/// contract where the caller drives repeated passes.
pub async fn run_incremental(
    ctx: &RunnerContext,
    adapter: &dyn ScmAdapter,
    cursor: Option<&str>,
    watermark_before: DateTime<Utc>,
) -> SyncResult {
    let window = Window { since: None, until: None };

    let page = match ctx.job_type.as_str() {
        "gitlab_commits" | "svn" => adapter.fetch_commits(cursor, window, ctx.batch_size).await.map(|p| p.items.len()),
        "gitlab_mrs" => adapter.fetch_merge_requests(cursor, window, ctx.batch_size).await.map(|p| p.items.len()),
        other => Err(anyhow::anyhow!("unsupported job_type for incremental sync: {other}")),
    };

    match page {
        Ok(items_synced) => {
            if !ctx.dry_run && items_synced > 0 {
                let _ = backfill::validate_watermark_advance(watermark_before, Utc::now());
            }
            SyncResult {
                phase: "incremental".to_string(),
                repo: ctx.repo_label.clone(),
                job: ctx.job_type.clone(),
                status: RunStatus::Success,
                items_synced: items_synced as u64,
                vfacts_refreshed: 0,
                error: None,
            }
        }
        Err(e) => SyncResult {
            phase: "incremental".to_string(),
            repo: ctx.repo_label.clone(),
            job: ctx.job_type.clone(),
            status: RunStatus::Failed,
            items_synced: 0,
            vfacts_refreshed: 0,
            error: Some(e.to_string()),
        },
    }
}

/// Loops `run_incremental` until `max_iterations` or `cancel` fires,
/// sleeping `loop_interval_seconds` between passes.
pub async fn run_incremental_loop(
    ctx: &RunnerContext,
    adapter: &dyn ScmAdapter,
    mut cursor: Option<String>,
    watermark_before: DateTime<Utc>,
    max_iterations: u32,
    loop_interval_seconds: u64,
    cancel: &(dyn Fn() -> bool + Sync),
) -> Vec<SyncResult> {
    let mut results = Vec::new();
    for _ in 0..max_iterations {
        if cancel() {
            results.push(SyncResult {
                    phase: "incremental".to_string(),
                    repo: ctx.repo_label.clone(),
                    job: ctx.job_type.clone(),
                    status: RunStatus::Cancelled,
                    items_synced: 0,
                    vfacts_refreshed: 0,
                    error: None,
            });
            break;
        }
        let result = run_incremental(ctx, adapter, cursor.as_deref(), watermark_before).await;
        let keep_going = result.status == RunStatus::Success && result.items_synced > 0;
        results.push(result);
        if !keep_going {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(loop_interval_seconds)).await;
    }
    results
}

pub enum BackfillRange {
    Time { since: DateTime<Utc>, until: DateTime<Utc> },
    Revision { start_rev: i64, end_rev: i64 },
}

/// Plans chunks, validates caps, then executes them in order.
/// Per-chunk failures do not abort the run; they accumulate into the
/// aggregated status.
pub async fn run_backfill(
    ctx: &RunnerContext,
    adapter: &dyn ScmAdapter,
    range: BackfillRange,
    limits: BackfillLimits,
) -> Result<AggregatedResult, BackfillWindowExceeded> {
    let chunks = match range {
        BackfillRange::Time { since, until } => {
            backfill::plan_time_window(since, until, ctx.window_chunk_hours, ctx.update_watermark, limits)?
        }
        BackfillRange::Revision { start_rev, end_rev } => {
            backfill::plan_revision_window(start_rev, end_rev, ctx.window_chunk_revs, ctx.update_watermark, limits)?
        }
    };

    let mut aggregated = AggregatedResult {
        total_chunks: chunks.len() as u32,
        success_chunks: 0,
        partial_chunks: 0,
        failed_chunks: 0,
        total_items_synced: 0,
        errors: Vec::new(),
        watermark_updated: None,
    };

    for chunk in &chunks {
        let window = match chunk {
            ChunkPayload::Time { window_since, window_until,.. } => Window { since: Some(*window_since), until: Some(*window_until) },
            ChunkPayload::Revision {.. } => Window { since: None, until: None },
        };

        let fetched = match ctx.job_type.as_str() {
            "gitlab_commits" | "svn" => adapter.fetch_commits(None, window, ctx.batch_size).await.map(|p| p.items.len()),
            "gitlab_mrs" => adapter.fetch_merge_requests(None, window, ctx.batch_size).await.map(|p| p.items.len()),
            other => Err(anyhow::anyhow!("unsupported job_type for backfill: {other}")),
        };

        match fetched {
            Ok(items_synced) => {
                aggregated.success_chunks += 1;
                aggregated.total_items_synced += items_synced as u64;
                if ctx.update_watermark {
                    if let ChunkPayload::Time { window_until,.. } = chunk {
                        if let Ok(advanced) = backfill::validate_watermark_advance(
                            aggregated.watermark_updated.unwrap_or(*window_until),
                            *window_until,
                        ) {
                            aggregated.watermark_updated = Some(advanced);
                        }
                    }
                }
            }
            Err(e) => {
                aggregated.failed_chunks += 1;
                aggregated.errors.push(e.to_string());
            }
        }
    }

    Ok(aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_success_only_when_every_chunk_succeeds() {
        let result = AggregatedResult {
            total_chunks: 3,
            success_chunks: 3,
            partial_chunks: 0,
            failed_chunks: 0,
            total_items_synced: 10,
            errors: vec![],
            watermark_updated: None,
        };
        assert_eq!(result.status(), RunStatus::Success);
        assert_eq!(result.status().exit_code(), 0);
    }

    #[test]
    fn status_is_failed_only_when_nothing_succeeded_or_partially_succeeded() {
        let result = AggregatedResult {
            total_chunks: 2,
            success_chunks: 0,
            partial_chunks: 0,
            failed_chunks: 2,
            total_items_synced: 0,
            errors: vec!["boom".to_string()],
            watermark_updated: None,
        };
        assert_eq!(result.status(), RunStatus::Failed);
        assert_eq!(result.status().exit_code(), 2);
    }

    #[test]
    fn status_is_partial_when_some_but_not_all_chunks_succeed() {
        let result = AggregatedResult {
            total_chunks: 3,
            success_chunks: 2,
            partial_chunks: 0,
            failed_chunks: 1,
            total_items_synced: 5,
            errors: vec!["boom".to_string()],
            watermark_updated: None,
        };
        assert_eq!(result.status(), RunStatus::Partial);
        assert_eq!(result.status().exit_code(), 1);
    }

    #[test]
    fn status_is_skipped_when_there_are_no_chunks() {
        let result = AggregatedResult {
            total_chunks: 0,
            success_chunks: 0,
            partial_chunks: 0,
            failed_chunks: 0,
            total_items_synced: 0,
            errors: vec![],
            watermark_updated: None,
        };
        assert_eq!(result.status(), RunStatus::Skipped);
        assert_eq!(result.status().exit_code(), 2);
    }
}
