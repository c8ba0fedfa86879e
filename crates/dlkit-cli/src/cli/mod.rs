//! Thin CLI harness over the `dlkit-core` engine.
//!
//! Intentionally unambitious: this binary exists to exercise `TaskManager`
//! end to end (add/run/status/pause/resume/remove/set-priority/checksum),
//! not to be a production download-manager surface in its own right.

mod commands;
mod task_id;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dlkit_core::coordinator::Coordinator;
use dlkit_core::gate::Gate;
use dlkit_core::host_policy::HostPolicy;
use dlkit_core::model::Priority;
use dlkit_core::queue::Queue;
use dlkit_core::source::SourceRegistry;
use dlkit_core::store::TaskStore;
use dlkit_core::task::TaskManager;
use dlkit_core::{config, control::JobControl};

use commands::{run_add, run_checksum, run_pause, run_remove, run_resume, run_run, run_set_priority, run_status};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Urgent => Priority::Urgent,
        }
    }
}

/// Top-level CLI for the dlkit download engine.
#[derive(Debug, Parser)]
#[command(name = "dlkit")]
#[command(about = "dlkit: multi-protocol segmented download engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download task.
    Add {
        /// URL to download (http/https/ftp/magnet, per the registered sources).
        url: String,
        /// Destination directory (default: current directory).
        #[arg(long, value_name = "DIR")]
        destination: Option<PathBuf>,
        /// Segment count; 0 uses the configured default.
        #[arg(long, default_value_t = 0)]
        connections: usize,
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        /// Speed cap: "unlimited", "500k", "2m", or a raw byte count.
        #[arg(long, value_name = "RATE")]
        speed_limit: Option<String>,
        /// Hold the task until this many seconds from now have elapsed.
        #[arg(long, value_name = "SECS")]
        schedule_in: Option<u64>,
        #[arg(long)]
        wifi_only: bool,
        #[arg(long)]
        unmetered: bool,
        #[arg(long)]
        charging: bool,
    },

    /// Restore persisted tasks, drain the schedule gate, and report progress
    /// until every task is either terminal or still gated/paused.
    Run {
        /// Gate re-evaluation and progress-print cadence.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Show every known task and its current state.
    Status,

    /// Request a resumable pause on a running task.
    Pause {
        task_id: String,
    },

    /// Resume a paused or failed task, optionally to a new destination.
    Resume {
        task_id: String,
        #[arg(long, value_name = "DIR")]
        destination: Option<PathBuf>,
    },

    /// Remove a task; with --delete-output also deletes partial bytes on disk.
    Remove {
        task_id: String,
        #[arg(long)]
        delete_output: bool,
    },

    /// Reprioritize a waiting task, possibly preempting a running one.
    SetPriority {
        task_id: String,
        #[arg(value_enum)]
        priority: PriorityArg,
    },

    /// Compute SHA-256 of a file (e.g. a completed download), or verify it
    /// against a published digest with --expect.
    Checksum {
        path: String,
        #[arg(long, value_name = "DIGEST")]
        expect: Option<String>,
    },
}

async fn build_manager() -> Result<TaskManager> {
    let cfg = config::load_or_init()?;
    tracing::debug!("loaded config: {:?}", cfg);
    let store = TaskStore::open_default().await?;
    let (events_tx, _events_rx) = tokio::sync::broadcast::channel(256);
    let queue = Queue::new(cfg.queue.max_concurrent_downloads, cfg.queue.max_connections_per_host);
    let coordinator = Coordinator::new(
        SourceRegistry::with_defaults(),
        store.clone(),
        JobControl::new(),
        HostPolicy::load_or_default(),
        cfg,
        queue,
        events_tx,
    );
    let manager = TaskManager::new(coordinator, Gate::with_default_conditions(), store);
    manager.restore().await;
    Ok(manager)
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let manager = build_manager().await?;

        match cli.command {
            CliCommand::Add {
                url,
                destination,
                connections,
                priority,
                speed_limit,
                schedule_in,
                wifi_only,
                unmetered,
                charging,
            } => {
                run_add(
                    &manager,
                    url,
                    destination,
                    connections,
                    priority.into(),
                    speed_limit,
                    schedule_in,
                    wifi_only,
                    unmetered,
                    charging,
                )
                .await?
            }
            CliCommand::Run { interval_ms } => run_run(&manager, interval_ms).await?,
            CliCommand::Status => run_status(&manager).await?,
            CliCommand::Pause { task_id } => run_pause(&manager, &task_id).await?,
            CliCommand::Resume { task_id, destination } => run_resume(&manager, &task_id, destination).await?,
            CliCommand::Remove { task_id, delete_output } => run_remove(&manager, &task_id, delete_output).await?,
            CliCommand::SetPriority { task_id, priority } => {
                run_set_priority(&manager, &task_id, priority.into()).await?
            }
            CliCommand::Checksum { path, expect } => run_checksum(std::path::Path::new(&path), expect).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
