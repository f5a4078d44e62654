//! Persists `BreakerState` through `engram_db::kv`, namespaced so it
//! survives process restarts.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::scope::{legacy_keys, Scope};
use crate::state::{check, BreakerConfig, BreakerState, HealthStats, State};

const NAMESPACE: &str = "circuit_breaker";

/// Loads state for `scope_key`, falling back to any legacy key that still
/// holds a value (read-only upgrade path, never written back under the
/// legacy name).
pub async fn load(pool: &PgPool, scope_key: &str, scope: &Scope) -> Result<BreakerState> {
    if let Some(value) = engram_db::kv::get(pool, NAMESPACE, scope_key).await? {
        return Ok(serde_json::from_value(value)?);
    }

    for legacy in legacy_keys(scope) {
        if let Some(value) = engram_db::kv::get(pool, NAMESPACE, &legacy).await? {
            return Ok(serde_json::from_value(value)?);
        }
    }

    Ok(BreakerState::default())
}

/// Compare-and-set write: `expected` must be the value this call's
/// decision was computed from, so a concurrent writer's transition isn't
/// silently overwritten.
pub async fn store_cas(
    pool: &PgPool,
    scope_key: &str,
    expected: Option<&BreakerState>,
    new_state: &BreakerState,
) -> Result<bool> {
    let expected_json = expected.map(serde_json::to_value).transpose()?;
    let new_json = serde_json::to_value(new_state)?;
    engram_db::kv::compare_and_set(pool, NAMESPACE, scope_key, expected_json.as_ref(), &new_json).await
}

/// Re-evaluates every persisted scope with zero traffic since the last
/// read. An Open breaker whose `open_duration_seconds` has elapsed moves to
/// HalfOpen here even if no caller happens to probe it in the meantime, so
/// a quiet scope isn't stuck open indefinitely. Returns the number of
/// scopes whose state changed.
pub async fn sweep_idle(pool: &PgPool, cfg: &BreakerConfig, now: DateTime<Utc>) -> Result<usize> {
    let keys = engram_db::kv::list_keys(pool, NAMESPACE).await?;
    let idle = HealthStats::default();
    let mut changed = 0;

    for key in keys {
        let Some(value) = engram_db::kv::get(pool, NAMESPACE, &key).await? else {
            continue;
        };
        let mut state: BreakerState = serde_json::from_value(value.clone())?;
        let before = state.state;
        check(cfg, &mut state, &idle, now);
        if state.state != before {
            engram_db::kv::compare_and_set(pool, NAMESPACE, &key, Some(&value), &serde_json::to_value(&state)?).await?;
            changed += 1;
        }
    }

    Ok(changed)
}

/// Count of scopes currently `Open`, for ops-surface gauges.
pub async fn count_open(pool: &PgPool) -> Result<i64> {
    let keys = engram_db::kv::list_keys(pool, NAMESPACE).await?;
    let mut open = 0;
    for key in keys {
        if let Some(value) = engram_db::kv::get(pool, NAMESPACE, &key).await? {
            let state: BreakerState = serde_json::from_value(value)?;
            if state.state == State::Open {
                open += 1;
            }
        }
    }
    Ok(open)
}
