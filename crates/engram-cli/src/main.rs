//! `engram-cli`: operational tooling for the governed memory-write
//! pipeline. Not the agent-facing write API, which lives behind the HTTP
//! front door this workspace treats as an external collaborator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engram_config::{CircuitBreakerConfig, DaemonConfig, MemoryServiceConfig, OutboxConfig, StoreConfig};
use engram_memory_client::HttpMemoryServiceClient;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Operational CLI for the governed memory-write pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending schema migrations and exit.
    Migrate,

    /// Start the ops surface (/v1/health, /v1/status, /v1/metrics) and the
    /// outbox/breaker background loops. Same bootstrap as the
    /// `engram-daemon` binary.
    Serve,

    /// Inspect or requeue outbox rows.
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },

    /// Enqueue or inspect source-control sync jobs.
    Scm {
        #[command(subcommand)]
        cmd: ScmCmd,
    },
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// List pending rows, most recently enqueued first.
    Ls {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Reset a dead row back to pending so the worker picks it up again.
    Requeue {
        #[arg(long)]
        outbox_id: i64,
    },
}

#[derive(Subcommand)]
enum ScmCmd {
    /// Upsert the repository row and enqueue a sync job against it.
    Enqueue {
        #[arg(long)]
        vcs_type: String,
        #[arg(long)]
        remote_url: String,
        #[arg(long)]
        tenant_id: Option<String>,
        #[arg(long)]
        instance_key: String,
        #[arg(long)]
        job_type: String,
        #[arg(long, default_value = "incremental")]
        mode: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Inline JSON payload for the job; defaults to `{}`.
        #[arg(long)]
        payload: Option<String>,
    },
    /// Print queue depth, or a single job's state with `--job-id`.
    Status {
        #[arg(long)]
        job_id: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Migrate => {
            let store_cfg = StoreConfig::from_env()?;
            let pool = engram_db::connect(&store_cfg.postgres_dsn).await?;
            engram_db::migrate(&pool, &store_cfg.migrate_lock_key()).await?;
            println!("migrations_applied=true");
        }

        Commands::Serve => {
            let store_cfg = StoreConfig::from_env()?;
            let memory_cfg = MemoryServiceConfig::from_env()?;
            let outbox_cfg = OutboxConfig::from_env()?;
            let breaker_cfg = CircuitBreakerConfig::from_env()?;
            let daemon_cfg = DaemonConfig::from_env()?;

            let pool = engram_db::connect(&store_cfg.postgres_dsn).await?;
            engram_db::migrate(&pool, &store_cfg.migrate_lock_key()).await?;
            let memory_client = Arc::new(HttpMemoryServiceClient::new(&memory_cfg)?);

            engram_daemon::bootstrap::run_server(pool, memory_client, outbox_cfg, breaker_cfg, daemon_cfg).await?;
        }

        Commands::Outbox { cmd } => {
            let store_cfg = StoreConfig::from_env()?;
            let pool = engram_db::connect(&store_cfg.postgres_dsn).await?;

            match cmd {
                OutboxCmd::Ls { limit } => {
                    let rows = engram_db::outbox::list_pending(&pool, limit).await?;
                    for row in rows {
                        println!(
                            "outbox_id={} status={} target_space={} retry_count={} next_attempt_at={}",
                            row.outbox_id, row.status, row.target_space, row.retry_count, row.next_attempt_at
                        );
                    }
                }
                OutboxCmd::Requeue { outbox_id } => {
                    let requeued = engram_db::outbox::reset_dead_to_pending(&pool, outbox_id).await?;
                    println!("outbox_id={} requeued={}", outbox_id, requeued);
                }
            }
        }

        Commands::Scm { cmd } => {
            let store_cfg = StoreConfig::from_env()?;
            let pool = engram_db::connect(&store_cfg.postgres_dsn).await?;

            match cmd {
                ScmCmd::Enqueue {
                    vcs_type,
                    remote_url,
                    tenant_id,
                    instance_key,
                    job_type,
                    mode,
                    priority,
                    payload,
                } => {
                    let payload_json: Value = match payload {
                        Some(raw) => serde_json::from_str(&raw).context("--payload must be valid JSON")?,
                        None => Value::Object(Default::default()),
                    };

                    let repo = engram_db::scm::upsert_repository(&pool, &vcs_type, &remote_url, tenant_id.as_deref(), &instance_key).await?;
                    let job = engram_db::scm::enqueue_job(&pool, repo.repo_id, &job_type, &mode, priority, payload_json).await?;

                    println!("repo_id={}", repo.repo_id);
                    println!("job_id={}", job.job_id);
                    println!("status={}", job.status);
                }

                ScmCmd::Status { job_id } => {
                    let queued = engram_db::scm::count_queued(&pool).await?;
                    println!("queue_depth={}", queued);

                    if let Some(job_id) = job_id {
                        match engram_db::scm::fetch_job(&pool, job_id).await? {
                            Some(job) => println!(
                                "job_id={} repo_id={} status={} attempts={}/{} last_error={:?}",
                                job.job_id, job.repo_id, job.status, job.attempts, job.max_attempts, job.last_error
                            ),
                            None => println!("job_id={} not_found=true", job_id),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .init();
}
