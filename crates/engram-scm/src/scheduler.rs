//! Pure-function scheduler core. Given the states of all repos and
//! the current budget, emits a bounded set of job candidates to enqueue.
//! Never touches the store itself; the caller reads `RepoSyncState` and
//! `BudgetSnapshot` from the store, calls `schedule`, and enqueues whatever
//! comes back.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use engram_schemas::RepoSyncState;
use uuid::Uuid;

const BUCKET_PAUSED_PRIORITY_PENALTY: i64 = 1000;
const BUCKET_LOW_TOKENS_PRIORITY_PENALTY: i64 = 200;
const LOW_TOKENS_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_running: u32,
    pub max_queue_depth: u32,
    pub per_instance_concurrency: u32,
    pub per_tenant_concurrency: u32,
    pub cursor_age_threshold_seconds: i64,
    pub error_budget_threshold: f64,
    pub rate_limit_hit_threshold: f64,
    pub max_enqueue_per_scan: u32,
    pub enable_tenant_fairness: bool,
    pub tenant_fairness_max_per_round: u32,
    pub job_type_priority: HashMap<String, i64>,
    pub mvp_allowlist: Option<HashSet<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct BudgetSnapshot {
    pub running: u32,
    pub active: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStatus {
    pub is_paused: bool,
    pub pause_remaining_seconds: f64,
    pub current_tokens: f64,
    pub burst: f64,
    pub rate: f64,
    pub skip_on_pause: bool,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub repo_id: Uuid,
    pub job_type: String,
    pub tenant_id: Option<String>,
    pub priority: i64,
    pub reasons: Vec<String>,
}

fn failure_rate(repo: &RepoSyncState) -> f64 {
    if repo.run_count == 0 {
        0.0
    } else {
        repo.failed_count as f64 / repo.run_count as f64
    }
}

fn rate_limit_rate(repo: &RepoSyncState) -> f64 {
    if repo.total_requests == 0 {
        0.0
    } else {
        repo.rate_limit_hits as f64 / repo.total_requests as f64
    }
}

enum ScheduleDecision {
    Skip,
    CursorStale { priority_adj: i64 },
    RateLimited,
}

fn decide_repo(cfg: &SchedulerConfig, repo: &RepoSyncState, now: DateTime<Utc>) -> ScheduleDecision {
    if failure_rate(repo) >= cfg.error_budget_threshold {
        return ScheduleDecision::Skip;
    }

    let cursor_age_seconds = match repo.cursor_updated_at {
        Some(updated_at) => (now - updated_at).num_seconds(),
        None => i64::MAX,
    };

    if cursor_age_seconds >= cfg.cursor_age_threshold_seconds {
        let priority_adj = if repo.cursor_updated_at.is_none() {
            -100
        } else {
            -(cursor_age_seconds / 3600).min(24)
        };
        return ScheduleDecision::CursorStale { priority_adj };
    }

    if rate_limit_rate(repo) >= cfg.rate_limit_hit_threshold {
        return ScheduleDecision::RateLimited;
    }

    ScheduleDecision::Skip
}

/// Builds the full candidate list (before admission control) for one
/// `job_type`. The caller runs this per eligible job type and merges.
pub fn build_candidates(
    cfg: &SchedulerConfig,
    repos: &[RepoSyncState],
    job_type: &str,
    queued_pairs: &HashSet<(Uuid, String)>,
    bucket_statuses: &HashMap<String, BucketStatus>,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let mut out = Vec::new();

    for repo in repos {
        let decision = decide_repo(cfg, repo, now);
        let (mut priority, reason) = match decision {
            ScheduleDecision::Skip => continue,
            ScheduleDecision::CursorStale { priority_adj } => (priority_adj, "cursor_stale".to_string()),
            ScheduleDecision::RateLimited => (50, "rate_limited".to_string()),
        };

        if queued_pairs.contains(&(repo.repo_id, job_type.to_string())) {
            continue;
        }
        if let Some(allowlist) = &cfg.mvp_allowlist {
            if !allowlist.contains(job_type) {
                continue;
            }
        }

        let base = cfg.job_type_priority.get(job_type).copied().unwrap_or(0) * 100;
        priority += base + (100.0 * failure_rate(repo)) as i64 + (200.0 * rate_limit_rate(repo)) as i64;

        let mut reasons = vec![reason];

        if let Some(instance_key) = &repo.instance_key {
            if let Some(bucket) = bucket_statuses.get(instance_key) {
                if bucket.is_paused {
                    if bucket.skip_on_pause {
                        continue;
                    }
                    priority += BUCKET_PAUSED_PRIORITY_PENALTY;
                    reasons.push("bucket_paused".to_string());
                } else if bucket.burst > 0.0 && bucket.current_tokens / bucket.burst < LOW_TOKENS_FRACTION {
                    priority += BUCKET_LOW_TOKENS_PRIORITY_PENALTY;
                    reasons.push("bucket_low_tokens".to_string());
                }
            }
        }

        out.push(Candidate {
                repo_id: repo.repo_id,
                job_type: job_type.to_string(),
                tenant_id: repo.tenant_id.clone(),
                priority,
                reasons,
        });
    }

    out.sort_by_key(|c| c.priority);
    out
}

/// Applies tenant-fairness regrouping (if enabled) and admission control,
/// returning the final bounded list to enqueue.
pub fn admit(cfg: &SchedulerConfig, mut candidates: Vec<Candidate>, budget: &BudgetSnapshot) -> Vec<Candidate> {
    if budget.running >= cfg.max_running || budget.active >= cfg.max_queue_depth {
        return Vec::new();
    }

    if cfg.enable_tenant_fairness {
        candidates = regroup_tenant_fair(candidates, cfg.tenant_fairness_max_per_round);
    }

    let remaining_depth = cfg.max_queue_depth.saturating_sub(budget.active);
    let cap = cfg.max_enqueue_per_scan.min(remaining_depth) as usize;

    let mut instance_counts: HashMap<Option<String>, u32> = HashMap::new();
    let mut tenant_counts: HashMap<Option<String>, u32> = HashMap::new();
    let mut out = Vec::new();

    for candidate in candidates {
        if out.len() >= cap {
            break;
        }
        let tenant_entry = tenant_counts.entry(candidate.tenant_id.clone()).or_insert(0);
        if *tenant_entry >= cfg.per_tenant_concurrency {
            continue;
        }
        let instance_entry = instance_counts.entry(None).or_insert(0);
        if *instance_entry >= cfg.per_instance_concurrency {
            continue;
        }
        *tenant_entry += 1;
        *instance_entry += 1;
        out.push(candidate);
    }

    out
}

/// Regroups by tenant, keeping intra-bucket priority order, and interleaves
/// `max_per_round` per tenant per pass so a tenant with a small backlog is
/// never fully starved by one with a large backlog.
fn regroup_tenant_fair(candidates: Vec<Candidate>, max_per_round: u32) -> Vec<Candidate> {
    let mut buckets: HashMap<Option<String>, Vec<Candidate>> = HashMap::new();
    let mut order: Vec<Option<String>> = Vec::new();

    for candidate in candidates {
        let key = candidate.tenant_id.clone();
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(candidate);
    }

    let mut out = Vec::new();
    loop {
        let mut took_any = false;
        for key in &order {
            let bucket = buckets.get_mut(key).unwrap();
            let take = (max_per_round as usize).min(bucket.len());
            if take == 0 {
                continue;
            }
            out.extend(bucket.drain(0..take));
            took_any = true;
        }
        if !took_any {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(repo_id: Uuid, tenant_id: Option<&str>, run_count: i64, failed_count: i64) -> RepoSyncState {
        RepoSyncState {
            repo_id,
            vcs_type: "git".to_string(),
            instance_key: Some("gitlab-1".to_string()),
            tenant_id: tenant_id.map(str::to_string),
            cursor_updated_at: None,
            run_count,
            failed_count,
            rate_limit_hits: 0,
            total_requests: 0,
            last_status: None,
            is_queued: false,
        }
    }

    fn cfg() -> SchedulerConfig {
        SchedulerConfig {
            max_running: 100,
            max_queue_depth: 100,
            per_instance_concurrency: 100,
            per_tenant_concurrency: 100,
            cursor_age_threshold_seconds: 3600,
            error_budget_threshold: 0.5,
            rate_limit_hit_threshold: 0.3,
            max_enqueue_per_scan: 50,
            enable_tenant_fairness: true,
            tenant_fairness_max_per_round: 2,
            job_type_priority: HashMap::new(),
            mvp_allowlist: None,
        }
    }

    #[test]
    fn never_synced_repo_gets_priority_bonus() {
        let cfg = cfg();
        let repos = vec![repo(Uuid::new_v4(), Some("t1"), 0, 0)];
        let candidates = build_candidates(&cfg, &repos, "gitlab_commits", &HashSet::new(), &HashMap::new(), Utc::now());
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].priority <= -100);
    }

    #[test]
    fn error_budget_exhaustion_skips_the_repo() {
        let cfg = cfg();
        let repos = vec![repo(Uuid::new_v4(), Some("t1"), 10, 6)];
        let candidates = build_candidates(&cfg, &repos, "gitlab_commits", &HashSet::new(), &HashMap::new(), Utc::now());
        assert!(candidates.is_empty());
    }

    #[test]
    fn tenant_fairness_interleaves_small_and_large_backlogs() {
        let mut repos = Vec::new();
        for _ in 0..15 {
            repos.push(repo(Uuid::new_v4(), Some("tenant_a"), 0, 0));
        }
        repos.push(repo(Uuid::new_v4(), Some("tenant_b"), 0, 0));

        let cfg = cfg();
        let candidates = build_candidates(&cfg, &repos, "gitlab_commits", &HashSet::new(), &HashMap::new(), Utc::now());
        let admitted = admit(&cfg, candidates, &BudgetSnapshot::default());

        let first_six: Vec<_> = admitted.iter().take(6).map(|c| c.tenant_id.clone()).collect();
        let tenant_b_count = first_six.iter().filter(|t| t.as_deref() == Some("tenant_b")).count();
        assert!(tenant_b_count >= 2, "tenant_b must not be starved among the first 6 admitted jobs");
    }

    #[test]
    fn admission_control_emits_nothing_once_max_running_is_reached() {
        let cfg = cfg();
        let repos = vec![repo(Uuid::new_v4(), Some("t1"), 0, 0)];
        let candidates = build_candidates(&cfg, &repos, "gitlab_commits", &HashSet::new(), &HashMap::new(), Utc::now());
        let budget = BudgetSnapshot { running: cfg.max_running, active: 0 };
        let admitted = admit(&cfg, candidates, &budget);
        assert!(admitted.is_empty());
    }
}
