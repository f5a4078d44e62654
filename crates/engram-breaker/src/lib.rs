//! Scope-keyed circuit breaker: CLOSED / OPEN / HALF_OPEN, EMA
//! smoothing, sample-floor gating, graded HALF_OPEN recovery.

pub mod persist;
pub mod scope;
pub mod state;

pub use scope::{scope_key, Scope};
pub use state::{BreakerConfig, BreakerState, CheckResult, HealthStats, State};
