//! ACP CLI - operator interface to the agent control plane.
//!
//! Every command prints JSON on stdout; logs go to stderr.

use acp_core::{ControlPlaneConfig, ControlRequest, TaskSpec, WorkerResult};
use acp_orchestrator::ControlPlane;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "acp")]
#[command(about = "Agent control plane - task orchestration for coding agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = ".acp/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the database
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Run the periodic tick until Ctrl+C
    Serve,

    /// Run a single tick
    Tick,

    /// Show the last tick, system controls and task counts
    Health,

    /// Task operations
    #[command(subcommand)]
    Task(TaskCommands),

    /// System-wide control: emergency_stop, emergency_stop_clear, circuit_reset
    Control {
        action: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Worker operations
    #[command(subcommand)]
    Worker(WorkerCommands),
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Submit a new task
    Create {
        /// What the task should achieve
        goal: String,

        /// Repository the work targets
        repo: String,

        #[arg(short, long)]
        branch: Option<String>,

        /// Acceptance criterion (repeatable)
        #[arg(short = 'a', long = "criterion")]
        criteria: Vec<String>,

        /// P0, P1 or P2
        #[arg(short, long)]
        priority: Option<String>,

        /// low, medium or high
        #[arg(short, long)]
        risk: Option<String>,

        /// Jobs of this task allowed to run at once (1-10)
        #[arg(long)]
        parallelism: Option<i64>,

        /// Declare that this change cannot be rolled back
        #[arg(long)]
        no_rollback: bool,

        #[arg(long)]
        requested_by: Option<String>,

        /// Extra metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// List tasks, newest first
    List {
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show a task with its plan, jobs and audit trail
    Show { task_id: String },

    /// List the jobs of a task
    Jobs { task_id: String },

    /// List the events of a task
    Events {
        task_id: String,

        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Apply pause, resume, cancel, emergency_stop or force_rollback
    Control {
        task_id: String,

        action: String,

        #[command(flatten)]
        request: RequestArgs,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Claim dispatched jobs
    Claim {
        worker_id: String,

        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Report the result of a job
    Report {
        job_id: String,

        /// completed, failed, timeout or canceled
        status: String,

        #[arg(short, long)]
        worker: Option<String>,

        #[arg(short, long)]
        error: Option<String>,

        /// Artifacts as JSON
        #[arg(long)]
        artifacts: Option<String>,

        /// Logs as JSON
        #[arg(long)]
        logs: Option<String>,

        /// Metrics as JSON
        #[arg(long)]
        metrics: Option<String>,
    },
}

#[derive(clap::Args)]
struct RequestArgs {
    /// Who is asking
    #[arg(long = "by")]
    requested_by: Option<String>,

    #[arg(long)]
    reason: Option<String>,
}

impl From<RequestArgs> for ControlRequest {
    fn from(args: RequestArgs) -> Self {
        Self {
            requested_by: args.requested_by,
            reason: args.reason,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_json_arg(name: &str, raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|raw| serde_json::from_str(&raw).with_context(|| format!("--{} is not valid JSON", name)))
        .transpose()
}

fn load_config(path: &Path) -> Result<ControlPlaneConfig> {
    ControlPlaneConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

async fn open_plane(path: &Path) -> Result<ControlPlane> {
    let config = load_config(path)?;
    let db = config.database_path.clone();
    ControlPlane::open(config)
        .await
        .with_context(|| format!("Failed to open database {}", db.display()))
}

async fn run_task_command(plane: &ControlPlane, command: TaskCommands) -> Result<()> {
    match command {
        TaskCommands::Create {
            goal,
            repo,
            branch,
            criteria,
            priority,
            risk,
            parallelism,
            no_rollback,
            requested_by,
            metadata,
        } => {
            let spec = TaskSpec {
                goal,
                repo,
                branch,
                acceptance_criteria: criteria,
                priority,
                risk_profile: risk,
                parallelism_limit: parallelism,
                rollback_available: no_rollback.then_some(false),
                source: Some("cli".to_string()),
                requested_by,
                metadata: parse_json_arg("metadata", metadata)?,
            };
            print_json(&plane.create_task(&spec).await?)
        }
        TaskCommands::List { limit } => print_json(&plane.list_tasks(limit).await?),
        TaskCommands::Show { task_id } => print_json(&plane.task_detail(&task_id).await?),
        TaskCommands::Jobs { task_id } => print_json(&plane.store().list_jobs(&task_id).await?),
        TaskCommands::Events { task_id, limit } => {
            print_json(&plane.store().list_events(&task_id, limit).await?)
        }
        TaskCommands::Control {
            task_id,
            action,
            request,
        } => print_json(
            &plane
                .control_task(&task_id, &action, &request.into())
                .await?,
        ),
    }
}

async fn run_worker_command(plane: &ControlPlane, command: WorkerCommands) -> Result<()> {
    match command {
        WorkerCommands::Claim { worker_id, limit } => {
            print_json(&plane.claim_jobs(&worker_id, limit).await?)
        }
        WorkerCommands::Report {
            job_id,
            status,
            worker,
            error,
            artifacts,
            logs,
            metrics,
        } => {
            let report = WorkerResult {
                worker_id: worker,
                job_id,
                status,
                error,
                artifacts: parse_json_arg("artifacts", artifacts)?,
                logs: parse_json_arg("logs", logs)?,
                metrics: parse_json_arg("metrics", metrics)?,
            };
            print_json(&plane.report_result(&report).await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for JSON
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { force } => {
            if cli.config.exists() && !force {
                eprintln!(
                    "{} {} already exists (use --force to overwrite)",
                    "!".yellow(),
                    cli.config.display()
                );
            } else {
                ControlPlaneConfig::write_default(&cli.config).with_context(|| {
                    format!("Failed to write config to {}", cli.config.display())
                })?;
            }

            let plane = open_plane(&cli.config).await?;
            eprintln!("{}", "✓ Initialized control plane".green().bold());
            eprintln!("  Config:   {}", cli.config.display());
            eprintln!("  Database: {}", plane.config().database_path.display());
            Ok(())
        }

        Commands::Serve => {
            let plane = open_plane(&cli.config).await?;
            eprintln!("{}", "Starting control plane...".green());
            eprintln!("  Database: {}", plane.config().database_path.display());
            eprintln!("  Tick:     every {}ms", plane.config().tick_interval_ms);
            eprintln!("  Press Ctrl+C to stop");

            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl+C received, shutting down");
                    let _ = shutdown_tx.send(()).await;
                }
            });

            plane.run_until(shutdown_rx).await;
            eprintln!("{}", "✓ Control plane stopped".green());
            Ok(())
        }

        Commands::Tick => {
            let plane = open_plane(&cli.config).await?;
            match plane.tick().await? {
                Some(summary) => print_json(&summary),
                None => print_json(&serde_json::json!({"skipped": true})),
            }
        }

        Commands::Health => {
            let plane = open_plane(&cli.config).await?;
            print_json(&plane.health().await?)
        }

        Commands::Task(command) => {
            let plane = open_plane(&cli.config).await?;
            run_task_command(&plane, command).await
        }

        Commands::Control { action, request } => {
            let plane = open_plane(&cli.config).await?;
            print_json(&plane.control_system(&action, &request.into()).await?)
        }

        Commands::Worker(command) => {
            let plane = open_plane(&cli.config).await?;
            run_worker_command(&plane, command).await
        }
    }
}
