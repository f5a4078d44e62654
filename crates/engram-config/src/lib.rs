//! Environment-driven configuration for the coordination substrate.
//!
//! Every concern (store, governance, scheduler, circuit breaker, outbox,
//! memory-service client) gets its own typed struct loaded once at process
//! start via `from_env()`. All required variables across a struct are
//! checked before the first error is raised, so an operator fixing one
//! missing var at a time never has to re-run just to discover the next.

mod canonical;
pub mod secrets;

pub use canonical::{canonical_snapshot, ConfigSnapshot};

use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable(s):\n - {}",.0.join("\n - "))]
    Missing(Vec<String>),
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_opt(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

fn env_u32(name: &str, default: u32, missing: &mut Vec<ParsedOrMissing>) -> u32 {
    match env_opt(name) {
        Some(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                missing.push(ParsedOrMissing::Invalid(name.to_string(), v));
                default
            }
        },
        None => default,
    }
}

fn env_f64(name: &str, default: f64, missing: &mut Vec<ParsedOrMissing>) -> f64 {
    match env_opt(name) {
        Some(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                missing.push(ParsedOrMissing::Invalid(name.to_string(), v));
                default
            }
        },
        None => default,
    }
}

enum ParsedOrMissing {
    Invalid(String, String),
}

/// `ENGRAM_POSTGRES_DSN`, `ENGRAM_POSTGRES_ADMIN_DSN`, `ENGRAM_SCHEMA_PREFIX`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub postgres_dsn: String,
    pub postgres_admin_dsn: Option<String>,
    pub schema_prefix: Option<String>,
    pub apply_roles: bool,
    pub public_policy: PublicPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicPolicy {
    Strict,
    OpenMemory,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let postgres_dsn = env_opt("ENGRAM_POSTGRES_DSN");
        if postgres_dsn.is_none() {
            missing.push("ENGRAM_POSTGRES_DSN".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let public_policy = match env_opt("ENGRAM_PUBLIC_POLICY").as_deref() {
            None | Some("strict") => PublicPolicy::Strict,
            Some("openmemory") => PublicPolicy::OpenMemory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                        name: "ENGRAM_PUBLIC_POLICY".to_string(),
                        value: other.to_string(),
                        reason: "expected strict|openmemory".to_string(),
                })
            }
        };

        Ok(Self {
                postgres_dsn: postgres_dsn.expect("checked above"),
                postgres_admin_dsn: env_opt("ENGRAM_POSTGRES_ADMIN_DSN"),
                schema_prefix: env_opt("ENGRAM_SCHEMA_PREFIX"),
                apply_roles: env_bool("ENGRAM_APPLY_ROLES", false),
                public_policy,
        })
    }

    /// Advisory-lock key every migrator acquires before running.
    pub fn migrate_lock_key(&self) -> String {
        format!(
            "engram_migrate:{}",
            self.schema_prefix.as_deref().unwrap_or("default")
        )
    }
}

/// `ENGRAM_UNKNOWN_ACTOR_POLICY`, `ENGRAM_GOVERNANCE_ADMIN_KEY`.
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub project_key: String,
    pub unknown_actor_policy: engram_schemas::UnknownActorPolicy,
    pub admin_key: Option<String>,
    pub private_space_prefix: String,
}

impl GovernanceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let project_key = env_opt("ENGRAM_PROJECT_KEY");
        if project_key.is_none() {
            missing.push("ENGRAM_PROJECT_KEY".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let policy_raw = env_opt("ENGRAM_UNKNOWN_ACTOR_POLICY").unwrap_or_else(|| "degrade".to_string());
        let unknown_actor_policy = engram_schemas::UnknownActorPolicy::parse(&policy_raw.to_lowercase())
        .ok_or_else(|| ConfigError::Invalid {
                name: "ENGRAM_UNKNOWN_ACTOR_POLICY".to_string(),
                value: policy_raw.clone(),
                reason: "expected reject|degrade|auto_create".to_string(),
        })?;

        Ok(Self {
                project_key: project_key.expect("checked above"),
                unknown_actor_policy,
                admin_key: env_opt("ENGRAM_GOVERNANCE_ADMIN_KEY"),
                private_space_prefix: env_opt("ENGRAM_PRIVATE_SPACE_PREFIX")
                .unwrap_or_else(|| "private:".to_string()),
        })
    }
}

/// `ENGRAM_MEMORY_SERVICE_URL`, `ENGRAM_MEMORY_SERVICE_API_KEY`.
#[derive(Debug, Clone)]
pub struct MemoryServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_client_retries: u32,
}

impl MemoryServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let base_url = env_opt("ENGRAM_MEMORY_SERVICE_URL");
        if base_url.is_none() {
            missing.push("ENGRAM_MEMORY_SERVICE_URL".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let mut invalid = Vec::new();
        let timeout_secs = env_u32("ENGRAM_MEMORY_SERVICE_TIMEOUT_SECONDS", 10, &mut invalid);
        let max_client_retries = env_u32("ENGRAM_MEMORY_SERVICE_MAX_CLIENT_RETRIES", 0, &mut invalid);
        raise_invalid(invalid)?;

        Ok(Self {
                base_url: base_url.expect("checked above").trim_end_matches('/').to_string(),
                api_key: env_opt("ENGRAM_MEMORY_SERVICE_API_KEY"),
                timeout: Duration::from_secs(timeout_secs as u64),
                max_client_retries,
        })
    }
}

/// `ENGRAM_SCHEDULER_*`.
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
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut invalid = Vec::new();
        let cfg = Self {
            max_running: env_u32("ENGRAM_SCHEDULER_MAX_RUNNING", 50, &mut invalid),
            max_queue_depth: env_u32("ENGRAM_SCHEDULER_MAX_QUEUE_DEPTH", 500, &mut invalid),
            per_instance_concurrency: env_u32(
                "ENGRAM_SCHEDULER_PER_INSTANCE_CONCURRENCY",
                5,
                &mut invalid,
            ),
            per_tenant_concurrency: env_u32(
                "ENGRAM_SCHEDULER_PER_TENANT_CONCURRENCY",
                10,
                &mut invalid,
            ),
            cursor_age_threshold_seconds: env_u32(
                "ENGRAM_SCHEDULER_CURSOR_AGE_THRESHOLD_SECONDS",
                3600,
                &mut invalid,
            ) as i64,
            error_budget_threshold: env_f64(
                "ENGRAM_SCHEDULER_ERROR_BUDGET_THRESHOLD",
                0.5,
                &mut invalid,
            ),
            rate_limit_hit_threshold: env_f64(
                "ENGRAM_SCHEDULER_RATE_LIMIT_HIT_THRESHOLD",
                0.3,
                &mut invalid,
            ),
            max_enqueue_per_scan: env_u32("ENGRAM_SCHEDULER_MAX_ENQUEUE_PER_SCAN", 100, &mut invalid),
            enable_tenant_fairness: env_bool("ENGRAM_SCHEDULER_ENABLE_TENANT_FAIRNESS", true),
            tenant_fairness_max_per_round: env_u32(
                "ENGRAM_SCHEDULER_TENANT_FAIRNESS_MAX_PER_ROUND",
                1,
                &mut invalid,
            ),
        };
        raise_invalid(invalid)?;
        Ok(cfg)
    }
}

/// `ENGRAM_CB_*`.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_rate_threshold: f64,
    pub rate_limit_rate_threshold: f64,
    pub timeout_rate_threshold: f64,
    pub min_samples: u32,
    pub smoothing_alpha: f64,
    pub enable_smoothing: bool,
    pub open_duration_seconds: i64,
    pub recovery_success_count: u32,
    pub probe_budget_per_interval: u32,
    pub probe_job_types_allowlist: Vec<String>,
}

impl CircuitBreakerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut invalid = Vec::new();
        let alpha = env_f64("ENGRAM_CB_SMOOTHING_ALPHA", 0.5, &mut invalid);
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::Invalid {
                    name: "ENGRAM_CB_SMOOTHING_ALPHA".to_string(),
                    value: alpha.to_string(),
                    reason: "must be in (0, 1]".to_string(),
            });
        }
        let cfg = Self {
            failure_rate_threshold: env_f64("ENGRAM_CB_FAILURE_RATE_THRESHOLD", 0.3, &mut invalid),
            rate_limit_rate_threshold: env_f64(
                "ENGRAM_CB_RATE_LIMIT_RATE_THRESHOLD",
                0.3,
                &mut invalid,
            ),
            timeout_rate_threshold: env_f64("ENGRAM_CB_TIMEOUT_RATE_THRESHOLD", 0.3, &mut invalid),
            min_samples: env_u32("ENGRAM_CB_MIN_SAMPLES", 5, &mut invalid),
            smoothing_alpha: alpha,
            enable_smoothing: env_bool("ENGRAM_CB_ENABLE_SMOOTHING", true),
            open_duration_seconds: env_u32("ENGRAM_CB_OPEN_DURATION_SECONDS", 60, &mut invalid) as i64,
            recovery_success_count: env_u32("ENGRAM_CB_RECOVERY_SUCCESS_COUNT", 3, &mut invalid),
            probe_budget_per_interval: env_u32(
                "ENGRAM_CB_PROBE_BUDGET_PER_INTERVAL",
                1,
                &mut invalid,
            ),
            probe_job_types_allowlist: env_opt("ENGRAM_CB_PROBE_JOB_TYPES_ALLOWLIST")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
        };
        raise_invalid(invalid)?;
        Ok(cfg)
    }
}

/// `ENGRAM_OUTBOX_*`.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub batch_size: u32,
    pub lease_seconds: i64,
    pub max_retries: u32,
    pub max_client_retries: u32,
    pub backoff_base_seconds: f64,
    pub backoff_jitter_factor: f64,
    pub worker_id: String,
}

impl OutboxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut invalid = Vec::new();
        let cfg = Self {
            batch_size: env_u32("ENGRAM_OUTBOX_BATCH_SIZE", 20, &mut invalid),
            lease_seconds: env_u32("ENGRAM_OUTBOX_LEASE_SECONDS", 60, &mut invalid) as i64,
            max_retries: env_u32("ENGRAM_OUTBOX_MAX_RETRIES", 5, &mut invalid),
            max_client_retries: env_u32("ENGRAM_OUTBOX_MAX_CLIENT_RETRIES", 0, &mut invalid),
            backoff_base_seconds: env_f64("ENGRAM_OUTBOX_BACKOFF_BASE_SECONDS", 1.0, &mut invalid),
            backoff_jitter_factor: env_f64("ENGRAM_OUTBOX_BACKOFF_JITTER_FACTOR", 0.2, &mut invalid),
            worker_id: env_opt("ENGRAM_OUTBOX_WORKER_ID")
            .unwrap_or_else(|| format!("outbox-{}", std::process::id())),
        };
        raise_invalid(invalid)?;
        Ok(cfg)
    }
}

/// `ENGRAM_DAEMON_ADDR`, the ops-surface bind address. Unset falls back to
/// a loopback default rather than an error; production deployments set the
/// var explicitly.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_addr: String,
    pub outbox_poll_interval_seconds: u64,
    pub breaker_sweep_interval_seconds: u64,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut invalid = Vec::new();
        let cfg = Self {
            bind_addr: env_opt("ENGRAM_DAEMON_ADDR").unwrap_or_else(|| "127.0.0.1:8899".to_string()),
            outbox_poll_interval_seconds: env_u32("ENGRAM_DAEMON_OUTBOX_POLL_INTERVAL_SECONDS", 5, &mut invalid) as u64,
            breaker_sweep_interval_seconds: env_u32("ENGRAM_DAEMON_BREAKER_SWEEP_INTERVAL_SECONDS", 30, &mut invalid) as u64,
        };
        raise_invalid(invalid)?;
        Ok(cfg)
    }
}

fn raise_invalid(invalid: Vec<ParsedOrMissing>) -> Result<(), ConfigError> {
    if let Some(ParsedOrMissing::Invalid(name, value)) = invalid.into_iter().next() {
        return Err(ConfigError::Invalid {
                name,
                value,
                reason: "expected a number".to_string(),
        });
    }
    Ok(())
}
