//! Backfill window planner. Pure chunking over a time or revision
//! range, plus the watermark-monotonicity guard shared by incremental and
//! backfill runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct BackfillLimits {
    pub max_total_window_seconds: i64,
    pub max_chunks_per_request: u32,
    pub seconds_per_rev: i64,
}

impl Default for BackfillLimits {
    fn default() -> Self {
        Self {
            max_total_window_seconds: 7 * 24 * 3600,
            max_chunks_per_request: 100,
            seconds_per_rev: 3600,
        }
    }
}

#[derive(Debug, Error)]
#[error("backfill window exceeds configured limits")]
pub struct BackfillWindowExceeded {
    pub errors: Vec<String>,
    pub limits: BackfillLimits,
    pub total_window_seconds: i64,
    pub chunk_count: u32,
}

#[derive(Debug, Error)]
#[error("watermark would regress from {before} to {after}")]
pub struct WatermarkConstraintError {
    pub before: DateTime<Utc>,
    pub after: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkConstraint {
    Monotonic,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "window_type", rename_all = "snake_case")]
pub enum ChunkPayload {
    Time {
        window_since: DateTime<Utc>,
        window_until: DateTime<Utc>,
        chunk_index: u32,
        chunk_total: u32,
        update_watermark: bool,
        watermark_constraint: WatermarkConstraint,
    },
    Revision {
        start_rev: i64,
        end_rev: i64,
        chunk_index: u32,
        chunk_total: u32,
        update_watermark: bool,
        watermark_constraint: WatermarkConstraint,
    },
}

fn constraint_for(update_watermark: bool) -> WatermarkConstraint {
    if update_watermark {
        WatermarkConstraint::Monotonic
    } else {
        WatermarkConstraint::None
    }
}

/// Splits `[since, until)` into consecutive `chunk_hours`-sized chunks, the
/// last possibly short. Boundaries are shared: `chunks[i].until ==
/// chunks[i+1].since`, and the union covers `[since, until)` exactly.
pub fn plan_time_window(
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    chunk_hours: i64,
    update_watermark: bool,
    limits: BackfillLimits,
) -> Result<Vec<ChunkPayload>, BackfillWindowExceeded> {
    let total_window_seconds = (until - since).num_seconds().max(0);
    let chunk_seconds = chunk_hours * 3600;
    let chunk_count = if total_window_seconds == 0 {
        0
    } else {
        ((total_window_seconds + chunk_seconds - 1) / chunk_seconds) as u32
    };

    check_limits(total_window_seconds, chunk_count, limits)?;

    let mut chunks = Vec::with_capacity(chunk_count as usize);
    let mut cursor = since;
    for index in 0..chunk_count {
        let chunk_until = (cursor + Duration::hours(chunk_hours)).min(until);
        chunks.push(ChunkPayload::Time {
                window_since: cursor,
                window_until: chunk_until,
                chunk_index: index,
                chunk_total: chunk_count,
                update_watermark,
                watermark_constraint: constraint_for(update_watermark),
        });
        cursor = chunk_until;
    }

    Ok(chunks)
}

/// Splits `[start_rev, end_rev]` (inclusive) into disjoint `chunk_size`
/// ranges covering the whole input with no overlap or gap.
pub fn plan_revision_window(
    start_rev: i64,
    end_rev: i64,
    chunk_size: i64,
    update_watermark: bool,
    limits: BackfillLimits,
) -> Result<Vec<ChunkPayload>, BackfillWindowExceeded> {
    let total_revs = (end_rev - start_rev + 1).max(0);
    let chunk_count = if total_revs == 0 {
        0
    } else {
        ((total_revs + chunk_size - 1) / chunk_size) as u32
    };

    let estimated_seconds = chunk_count as i64 * limits.seconds_per_rev;
    check_limits(estimated_seconds, chunk_count, limits)?;

    let mut chunks = Vec::with_capacity(chunk_count as usize);
    let mut cursor = start_rev;
    for index in 0..chunk_count {
        let chunk_end = (cursor + chunk_size - 1).min(end_rev);
        chunks.push(ChunkPayload::Revision {
                start_rev: cursor,
                end_rev: chunk_end,
                chunk_index: index,
                chunk_total: chunk_count,
                update_watermark,
                watermark_constraint: constraint_for(update_watermark),
        });
        cursor = chunk_end + 1;
    }

    Ok(chunks)
}

fn check_limits(total_window_seconds: i64, chunk_count: u32, limits: BackfillLimits) -> Result<(), BackfillWindowExceeded> {
    let mut errors = Vec::new();
    if total_window_seconds > limits.max_total_window_seconds {
        errors.push("max_total_window_seconds".to_string());
    }
    if chunk_count > limits.max_chunks_per_request {
        errors.push("max_chunks_per_request".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(BackfillWindowExceeded { errors, limits, total_window_seconds, chunk_count })
    }
}

/// Incremental cursors must never go backward. Backfill watermarks with
/// `update_watermark = false` skip this entirely; callers only
/// invoke this when a watermark move was actually requested.
pub fn validate_watermark_advance(before: DateTime<Utc>, computed_after: DateTime<Utc>) -> Result<DateTime<Utc>, WatermarkConstraintError> {
    if computed_after < before {
        return Err(WatermarkConstraintError { before, after: computed_after });
    }
    Ok(computed_after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_window_chunks_share_boundaries_and_cover_the_range() {
        let since = "2025-01-01T00:00:00Z".parse().unwrap();
        let until = "2025-01-02T10:00:00Z".parse().unwrap();
        let chunks = plan_time_window(since, until, 4, true, BackfillLimits::default()).unwrap();

        let (firsts, lasts): (Vec<_>, Vec<_>) = chunks
        .iter()
        .map(|c| match c {
                ChunkPayload::Time { window_since, window_until,.. } => (*window_since, *window_until),
                _ => unreachable!(),
        })
        .unzip();

        assert_eq!(firsts[0], since);
        assert_eq!(*lasts.last().unwrap(), until);
        for i in 0..chunks.len() - 1 {
            assert_eq!(lasts[i], firsts[i + 1]);
        }
    }

    #[test]
    fn revision_window_chunks_are_disjoint_and_cover_the_range() {
        let chunks = plan_revision_window(100, 249, 50, false, BackfillLimits::default()).unwrap();
        let mut covered = Vec::new();
        for chunk in &chunks {
            if let ChunkPayload::Revision { start_rev, end_rev, watermark_constraint,.. } = chunk {
                assert_eq!(*watermark_constraint, WatermarkConstraint::None);
                covered.push((*start_rev, *end_rev));
            }
        }
        assert_eq!(covered.first().unwrap().0, 100);
        assert_eq!(covered.last().unwrap().1, 249);
        for pair in covered.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }

    #[test]
    fn oversized_window_is_rejected_with_both_limit_names() {
        let since = "2025-01-01T00:00:00Z".parse().unwrap();
        let until = "2025-02-01T00:00:00Z".parse().unwrap();
        let err = plan_time_window(since, until, 4, true, BackfillLimits::default()).unwrap_err();
        assert!(err.errors.contains(&"max_total_window_seconds".to_string()));
        assert!(err.errors.contains(&"max_chunks_per_request".to_string()));
        assert_eq!(err.chunk_count, 186);
    }

    #[test]
    fn planning_is_deterministic() {
        let since = "2025-01-01T00:00:00Z".parse().unwrap();
        let until = "2025-01-03T07:30:00Z".parse().unwrap();
        let a = plan_time_window(since, until, 6, true, BackfillLimits::default()).unwrap();
        let b = plan_time_window(since, until, 6, true, BackfillLimits::default()).unwrap();
        let json_a = serde_json::to_string(&a).unwrap();
        let json_b = serde_json::to_string(&b).unwrap();
        assert_eq!(json_a, json_b);
    }

    #[test]
    fn watermark_advance_rejects_regression() {
        let before: DateTime<Utc> = "2025-01-02T00:00:00Z".parse().unwrap();
        let earlier: DateTime<Utc> = "2025-01-01T00:00:00Z".parse().unwrap();
        let err = validate_watermark_advance(before, earlier).unwrap_err();
        assert_eq!(err.before, before);
        assert_eq!(err.after, earlier);

        let later: DateTime<Utc> = "2025-01-03T00:00:00Z".parse().unwrap();
        let advanced = validate_watermark_advance(before, later).unwrap();
        assert_eq!(advanced, later);
    }
}
