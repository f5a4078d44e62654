//! Pure CLOSED/OPEN/HALF_OPEN state machine.
//!
//! `check` is a pure function over `(cfg, state, health, now)`: it never
//! touches the store itself, so the state machine's transition logic is
//! testable without a database. Persistence is in `persist`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_rate_threshold: f64,
    pub rate_limit_rate_threshold: f64,
    pub timeout_rate_threshold: f64,
    pub min_samples: u64,
    pub smoothing_alpha: f64,
    pub enable_smoothing: bool,
    pub open_duration_seconds: i64,
    pub recovery_success_count: u32,
    pub probe_budget_per_interval: u32,
    pub probe_job_types_allowlist: Vec<String>,
}

/// Per-scope persisted state. Smoothed values are carried across restarts
/// so a process bounce doesn't reset the breaker to a falsely-healthy
/// reading of zero samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    pub state: State,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_successes: u32,
    pub half_open_probes_used: u32,
    pub smoothed_failure_rate: f64,
    pub smoothed_rate_limit_rate: f64,
    pub smoothed_timeout_rate: f64,
    pub sample_count: u64,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: State::Closed,
            opened_at: None,
            half_open_successes: 0,
            half_open_probes_used: 0,
            smoothed_failure_rate: 0.0,
            smoothed_rate_limit_rate: 0.0,
            smoothed_timeout_rate: 0.0,
            sample_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthStats {
    pub requests: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub timeouts: u64,
}

impl HealthStats {
    fn failure_rate(&self) -> f64 {
        ratio(self.failures, self.requests)
    }

    fn rate_limit_rate(&self) -> f64 {
        ratio(self.rate_limited, self.requests)
    }

    fn timeout_rate(&self) -> f64 {
        ratio(self.timeouts, self.requests)
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub allow_sync: bool,
    pub is_backfill_only: bool,
    pub suggested_batch_size_factor: f64,
    pub suggested_forward_window_factor: f64,
    pub suggested_diff_mode_best_effort: bool,
    pub wait_seconds: f64,
    pub next_allowed_at: Option<DateTime<Utc>>,
    pub current_state: State,
    pub is_probe_mode: bool,
    pub probe_budget: u32,
    pub probe_job_types_allowlist: Vec<String>,
}

/// Advances the breaker with one interval's `health` and returns the
/// resulting decision. Sticky-state precedence: an already-open breaker
/// stays open (module its own timeout-driven half-open transition) even if
/// this interval's raw numbers look healthy, since those numbers might
/// themselves be produced under degraded conditions.
pub fn check(cfg: &BreakerConfig, state: &mut BreakerState, health: &HealthStats, now: DateTime<Utc>) -> CheckResult {
    update_smoothed(cfg, state, health);

    match state.state {
        State::Closed => check_closed(cfg, state, now),
        State::Open => check_open(cfg, state, now),
        State::HalfOpen => check_half_open(cfg, state, health, now),
    }
}

fn update_smoothed(cfg: &BreakerConfig, state: &mut BreakerState, health: &HealthStats) {
    if health.requests == 0 {
        return;
    }
    state.sample_count += health.requests;

    let (raw_failure, raw_rl, raw_timeout) = (health.failure_rate(), health.rate_limit_rate(), health.timeout_rate());

    if cfg.enable_smoothing {
        let alpha = cfg.smoothing_alpha;
        state.smoothed_failure_rate = alpha * raw_failure + (1.0 - alpha) * state.smoothed_failure_rate;
        state.smoothed_rate_limit_rate = alpha * raw_rl + (1.0 - alpha) * state.smoothed_rate_limit_rate;
        state.smoothed_timeout_rate = alpha * raw_timeout + (1.0 - alpha) * state.smoothed_timeout_rate;
    } else {
        state.smoothed_failure_rate = raw_failure;
        state.smoothed_rate_limit_rate = raw_rl;
        state.smoothed_timeout_rate = raw_timeout;
    }
}

fn should_trip(cfg: &BreakerConfig, state: &BreakerState) -> bool {
    if state.sample_count < cfg.min_samples {
        return false;
    }
    state.smoothed_failure_rate >= cfg.failure_rate_threshold
    || state.smoothed_rate_limit_rate >= cfg.rate_limit_rate_threshold
    || state.smoothed_timeout_rate >= cfg.timeout_rate_threshold
}

fn check_closed(cfg: &BreakerConfig, state: &mut BreakerState, now: DateTime<Utc>) -> CheckResult {
    if should_trip(cfg, state) {
        state.state = State::Open;
        state.opened_at = Some(now);
        state.half_open_successes = 0;
        state.half_open_probes_used = 0;
        return open_result(cfg, state, now);
    }

    CheckResult {
        allow_sync: true,
        is_backfill_only: false,
        suggested_batch_size_factor: 1.0,
        suggested_forward_window_factor: 1.0,
        suggested_diff_mode_best_effort: false,
        wait_seconds: 0.0,
        next_allowed_at: None,
        current_state: State::Closed,
        is_probe_mode: false,
        probe_budget: 0,
        probe_job_types_allowlist: Vec::new(),
    }
}

fn check_open(cfg: &BreakerConfig, state: &mut BreakerState, now: DateTime<Utc>) -> CheckResult {
    let opened_at = state.opened_at.unwrap_or(now);
    let elapsed = (now - opened_at).num_seconds();

    if elapsed >= cfg.open_duration_seconds {
        state.state = State::HalfOpen;
        state.half_open_successes = 0;
        state.half_open_probes_used = 0;
        return probe_result(cfg, state, now);
    }

    open_result(cfg, state, now)
}

fn check_half_open(cfg: &BreakerConfig, state: &mut BreakerState, health: &HealthStats, now: DateTime<Utc>) -> CheckResult {
    state.half_open_probes_used += health.requests.min(u32::MAX as u64) as u32;

    let probe_failed = health.failures > 0 || health.rate_limited > 0 || health.timeouts > 0;
    if probe_failed {
        state.state = State::Open;
        state.opened_at = Some(now);
        return open_result(cfg, state, now);
    }

    state.half_open_successes += health.requests.min(u32::MAX as u64) as u32;

    if state.half_open_successes >= cfg.recovery_success_count {
        state.state = State::Closed;
        state.opened_at = None;
        state.sample_count = 0;
        state.smoothed_failure_rate = 0.0;
        state.smoothed_rate_limit_rate = 0.0;
        state.smoothed_timeout_rate = 0.0;
        return check_closed(cfg, state, now);
    }

    if state.half_open_probes_used >= cfg.probe_budget_per_interval && state.half_open_successes < cfg.recovery_success_count
    {
        state.state = State::Open;
        state.opened_at = Some(now);
        return open_result(cfg, state, now);
    }

    probe_result(cfg, state, now)
}

fn open_result(cfg: &BreakerConfig, state: &BreakerState, now: DateTime<Utc>) -> CheckResult {
    let opened_at = state.opened_at.unwrap_or(now);
    let next_allowed_at = opened_at + chrono::Duration::seconds(cfg.open_duration_seconds);
    let wait_seconds = (next_allowed_at - now).num_milliseconds().max(0) as f64 / 1000.0;

    CheckResult {
        allow_sync: false,
        is_backfill_only: true,
        suggested_batch_size_factor: 0.0,
        suggested_forward_window_factor: 0.0,
        suggested_diff_mode_best_effort: true,
        wait_seconds,
        next_allowed_at: Some(next_allowed_at),
        current_state: State::Open,
        is_probe_mode: false,
        probe_budget: 0,
        probe_job_types_allowlist: Vec::new(),
    }
}

/// Parameters interpolate linearly from degraded toward default as
/// half-open successes accumulate, rather than snapping straight to full
/// throughput the moment probing starts.
fn probe_result(cfg: &BreakerConfig, state: &BreakerState, _now: DateTime<Utc>) -> CheckResult {
    let progress = if cfg.recovery_success_count == 0 {
        1.0
    } else {
        (state.half_open_successes as f64 / cfg.recovery_success_count as f64).min(1.0)
    };

    CheckResult {
        allow_sync: true,
        is_backfill_only: false,
        suggested_batch_size_factor: progress,
        suggested_forward_window_factor: progress,
        suggested_diff_mode_best_effort: progress < 1.0,
        wait_seconds: 0.0,
        next_allowed_at: None,
        current_state: State::HalfOpen,
        is_probe_mode: true,
        probe_budget: cfg.probe_budget_per_interval.saturating_sub(state.half_open_probes_used),
        probe_job_types_allowlist: cfg.probe_job_types_allowlist.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold: 0.3,
            rate_limit_rate_threshold: 0.3,
            timeout_rate_threshold: 0.3,
            min_samples: 5,
            smoothing_alpha: 1.0,
            enable_smoothing: true,
            open_duration_seconds: 60,
            recovery_success_count: 3,
            probe_budget_per_interval: 1,
            probe_job_types_allowlist: vec!["gitlab_commits".to_string()],
        }
    }

    #[test]
    fn stays_closed_below_min_samples_even_with_all_failures() {
        let cfg = cfg();
        let mut state = BreakerState::default();
        let health = HealthStats { requests: 2, failures: 2, rate_limited: 0, timeouts: 0 };
        let result = check(&cfg, &mut state, &health, Utc::now());
        assert_eq!(result.current_state, State::Closed);
        assert!(result.allow_sync);
    }

    #[test]
    fn trips_open_once_min_samples_and_threshold_are_both_met() {
        let cfg = cfg();
        let mut state = BreakerState::default();
        let health = HealthStats { requests: 10, failures: 6, rate_limited: 0, timeouts: 0 };
        let result = check(&cfg, &mut state, &health, Utc::now());
        assert_eq!(result.current_state, State::Open);
        assert!(!result.allow_sync);
        assert!(result.is_backfill_only);
    }

    #[test]
    fn open_transitions_to_half_open_after_open_duration() {
        let cfg = cfg();
        let mut state = BreakerState::default();
        let t0 = Utc::now();
        let health = HealthStats { requests: 10, failures: 6, rate_limited: 0, timeouts: 0 };
        check(&cfg, &mut state, &health, t0);
        assert_eq!(state.state, State::Open);

        let later = t0 + chrono::Duration::seconds(61);
        let result = check(&cfg, &mut state, &HealthStats::default(), later);
        assert_eq!(result.current_state, State::HalfOpen);
        assert!(result.is_probe_mode);
    }

    #[test]
    fn half_open_closes_after_recovery_success_count_consecutive_successes() {
        let cfg = cfg();
        let mut state = BreakerState {
            state: State::HalfOpen,
            opened_at: Some(Utc::now()),
            ..BreakerState::default()
        };
        let ok = HealthStats { requests: 1, failures: 0, rate_limited: 0, timeouts: 0 };
        check(&cfg, &mut state, &ok, Utc::now());
        check(&cfg, &mut state, &ok, Utc::now());
        let result = check(&cfg, &mut state, &ok, Utc::now());
        assert_eq!(result.current_state, State::Closed);
    }

    #[test]
    fn half_open_reopens_on_any_probe_failure() {
        let cfg = cfg();
        let mut state = BreakerState {
            state: State::HalfOpen,
            opened_at: Some(Utc::now()),
            ..BreakerState::default()
        };
        let failed = HealthStats { requests: 1, failures: 1, rate_limited: 0, timeouts: 0 };
        let result = check(&cfg, &mut state, &failed, Utc::now());
        assert_eq!(result.current_state, State::Open);
    }
}
