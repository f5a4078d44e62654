//! Per-loop error classification and adjustment-policy controller.
//!
//! One `DegradationController` is owned by a single sync loop (one
//! `(repo_id, job_type)` worker). It accumulates consecutive-error and
//! consecutive-success counters across loop iterations and turns them into
//! a `Suggestion` the caller applies to its next loop's parameters.

use std::time::Duration;

use engram_schemas::ErrorCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct DegradationConfig {
    pub rate_limited_threshold: u32,
    pub content_too_large_threshold: u32,
    pub recovery_success_threshold: u32,
    pub timeout_threshold: u32,
    pub server_error_threshold: u32,
    pub batch_size_min: u32,
    pub batch_size_default: u32,
    pub batch_shrink_factor: f64,
    pub batch_grow_factor: f64,
    pub forward_window_min_seconds: u32,
    pub forward_window_default_seconds: u32,
    pub forward_window_shrink_factor: f64,
    pub backoff_base_seconds: f64,
    pub backoff_max_seconds: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            rate_limited_threshold: 3,
            content_too_large_threshold: 3,
            recovery_success_threshold: 5,
            timeout_threshold: 3,
            server_error_threshold: 3,
            batch_size_min: 1,
            batch_size_default: 50,
            batch_shrink_factor: 0.5,
            batch_grow_factor: 1.25,
            forward_window_min_seconds: 60,
            forward_window_default_seconds: 3600,
            forward_window_shrink_factor: 0.5,
            backoff_base_seconds: 1.0,
            backoff_max_seconds: 300.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    Full,
    BestEffort,
    None,
}

#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub request_count: u64,
    pub unrecoverable_errors: Vec<ErrorCategory>,
    pub degraded_count: u64,
    pub bulk_count: u64,
    pub synced_count: u64,
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub diff_mode: DiffMode,
    pub batch_size: u32,
    pub sleep_seconds: f64,
    pub forward_window_seconds: u32,
    pub should_pause: bool,
    pub pause_reason: Option<String>,
    pub adjustment_reasons: Vec<String>,
}

#[derive(Debug, Clone)]
struct Consecutive {
    rate_limited: u32,
    content_too_large: u32,
    timeout: u32,
    server_error: u32,
    success: u32,
}

impl Default for Consecutive {
    fn default() -> Self {
        Self { rate_limited: 0, content_too_large: 0, timeout: 0, server_error: 0, success: 0 }
    }
}

pub struct DegradationController {
    cfg: DegradationConfig,
    consecutive: Consecutive,
    batch_size: u32,
    forward_window_seconds: u32,
    consecutive_pause_loops: u32,
}

impl DegradationController {
    pub fn new(cfg: DegradationConfig) -> Self {
        let batch_size = cfg.batch_size_default;
        let forward_window_seconds = cfg.forward_window_default_seconds;
        Self { cfg, consecutive: Consecutive::default(), batch_size, forward_window_seconds, consecutive_pause_loops: 0 }
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn forward_window_seconds(&self) -> u32 {
        self.forward_window_seconds
    }

    /// Folds one loop's outcome into the controller's counters and returns
    /// the suggestion to apply to the next loop.
    pub fn record(&mut self, stats: &LoopStats) -> Suggestion {
        let mut reasons = Vec::new();

        if stats.unrecoverable_errors.is_empty() {
            self.consecutive.success += 1;
            self.consecutive.rate_limited = 0;
            self.consecutive.content_too_large = 0;
            self.consecutive.timeout = 0;
            self.consecutive.server_error = 0;
        } else {
            self.consecutive.success = 0;
            for err in &stats.unrecoverable_errors {
                match err {
                    ErrorCategory::RateLimited => self.consecutive.rate_limited += 1,
                    ErrorCategory::ContentTooLarge => self.consecutive.content_too_large += 1,
                    ErrorCategory::Timeout => self.consecutive.timeout += 1,
                    ErrorCategory::ServerError => self.consecutive.server_error += 1,
                    _ => {}
                }
            }
        }

        let mut diff_mode = DiffMode::Full;

        if self.consecutive.rate_limited >= self.cfg.rate_limited_threshold {
            diff_mode = DiffMode::None;
            reasons.push(format!("rate_limited x{} -> diff_mode=none", self.consecutive.rate_limited));
        }
        if self.consecutive.content_too_large >= self.cfg.content_too_large_threshold {
            diff_mode = DiffMode::None;
            reasons.push(format!(
                    "content_too_large x{} -> diff_mode=none",
                    self.consecutive.content_too_large
            ));
        }
        if diff_mode == DiffMode::Full && self.consecutive.success >= self.cfg.recovery_success_threshold {
            diff_mode = DiffMode::BestEffort;
            reasons.push(format!("success x{} -> diff_mode=best_effort", self.consecutive.success));
        }

        let any_rate_limited_or_timeout = stats
        .unrecoverable_errors
        .iter()
        .any(|e| matches!(e, ErrorCategory::RateLimited | ErrorCategory::Timeout));
        if any_rate_limited_or_timeout {
            let shrunk = ((self.batch_size as f64) * self.cfg.batch_shrink_factor) as u32;
            self.batch_size = shrunk.max(self.cfg.batch_size_min);
            reasons.push(format!("rate_limited_or_timeout this loop -> batch_size={}", self.batch_size));
        } else if self.consecutive.success >= self.cfg.recovery_success_threshold && self.batch_size < self.cfg.batch_size_default {
            let grown = ((self.batch_size as f64) * self.cfg.batch_grow_factor) as u32;
            self.batch_size = grown.min(self.cfg.batch_size_default);
            reasons.push(format!("recovered -> batch_size={}", self.batch_size));
        }

        let any_rate_limited = stats.unrecoverable_errors.iter().any(|e| matches!(e, ErrorCategory::RateLimited));
        if any_rate_limited {
            let shrunk = ((self.forward_window_seconds as f64) * self.cfg.forward_window_shrink_factor) as u32;
            self.forward_window_seconds = shrunk.max(self.cfg.forward_window_min_seconds);
            reasons.push(format!("rate_limited this loop -> forward_window={}s", self.forward_window_seconds));
        }

        let mut should_pause = false;
        let mut sleep_seconds = 0.0;
        let mut pause_reason = None;

        if self.consecutive.timeout >= self.cfg.timeout_threshold || self.consecutive.server_error >= self.cfg.server_error_threshold {
            should_pause = true;
            self.consecutive_pause_loops += 1;
            sleep_seconds = exp_backoff(self.cfg.backoff_base_seconds, self.consecutive_pause_loops, self.cfg.backoff_max_seconds);
            pause_reason = Some(if self.consecutive.timeout >= self.cfg.timeout_threshold {
                    "consecutive_timeout".to_string()
                } else {
                    "consecutive_server_error".to_string()
            });
            reasons.push(format!("should_pause=true sleep={sleep_seconds}s"));
        } else {
            self.consecutive_pause_loops = 0;
        }

        if let Some(retry_after) = stats.retry_after {
            let capped = retry_after.as_secs_f64().min(self.cfg.backoff_max_seconds);
            sleep_seconds = capped;
            reasons.push(format!("retry_after -> sleep={capped}s"));
        }

        Suggestion {
            diff_mode,
            batch_size: self.batch_size,
            sleep_seconds,
            forward_window_seconds: self.forward_window_seconds,
            should_pause,
            pause_reason,
            adjustment_reasons: reasons,
        }
    }
}

fn exp_backoff(base: f64, attempt: u32, max: f64) -> f64 {
    (base * 2f64.powi(attempt.saturating_sub(1) as i32)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_streak_forces_diff_mode_none() {
        let mut ctl = DegradationController::new(DegradationConfig::default());
        let stats = LoopStats { request_count: 10, unrecoverable_errors: vec![ErrorCategory::RateLimited],..Default::default() };
        ctl.record(&stats);
        ctl.record(&stats);
        let suggestion = ctl.record(&stats);
        assert_eq!(suggestion.diff_mode, DiffMode::None);
    }

    #[test]
    fn recovery_streak_restores_best_effort_and_grows_batch() {
        let mut ctl = DegradationController::new(DegradationConfig::default());
        ctl.batch_size = 10;
        let ok = LoopStats { request_count: 10,..Default::default() };
        let mut last = None;
        for _ in 0..5 {
            last = Some(ctl.record(&ok));
        }
        let suggestion = last.unwrap();
        assert_eq!(suggestion.diff_mode, DiffMode::BestEffort);
        assert!(suggestion.batch_size > 10);
    }

    #[test]
    fn consecutive_timeouts_trigger_pause_with_backoff() {
        let mut ctl = DegradationController::new(DegradationConfig::default());
        let stats = LoopStats { request_count: 10, unrecoverable_errors: vec![ErrorCategory::Timeout],..Default::default() };
        ctl.record(&stats);
        ctl.record(&stats);
        let suggestion = ctl.record(&stats);
        assert!(suggestion.should_pause);
        assert_eq!(suggestion.pause_reason.as_deref(), Some("consecutive_timeout"));
        assert!(suggestion.sleep_seconds > 0.0);
    }

    #[test]
    fn retry_after_hint_caps_sleep_at_backoff_max() {
        let mut ctl = DegradationController::new(DegradationConfig::default());
        let stats = LoopStats { request_count: 1, retry_after: Some(Duration::from_secs(10_000)),..Default::default() };
        let suggestion = ctl.record(&stats);
        assert_eq!(suggestion.sleep_seconds, ctl.cfg.backoff_max_seconds);
    }
}
