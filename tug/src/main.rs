//! Tugboat CLI.
//!
//! Thin client over the daemon's Unix-socket API: every subcommand maps to
//! one protocol request. `--json` prints the raw response for scripting.

#![forbid(unsafe_code)]

mod client;
mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use tug_common::protocol::Request;
use tug_common::types::{ContainerId, UpdateStatus};

use client::DaemonClient;

#[derive(Parser)]
#[command(name = "tug")]
#[command(author, version, about = "Operate the Tugboat update daemon")]
struct Cli {
    /// Path to the daemon's Unix socket
    #[arg(long, env = "TUG_SOCKET_PATH", default_value = "/tmp/tugd.sock")]
    socket: PathBuf,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Daemon status summary
    Status,
    /// List monitored containers
    Containers,
    /// List updates
    Updates {
        /// Filter by status (pending, approved, rejected, applied, failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// Approve a pending update
    Approve {
        id: Uuid,
        /// Row version you last observed (shown by `tug updates`)
        #[arg(long)]
        version: u64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reject a pending update
    Reject {
        id: Uuid,
        #[arg(long)]
        version: u64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Snooze an update for a number of hours
    Snooze {
        id: Uuid,
        #[arg(long)]
        version: u64,
        #[arg(long, default_value = "24")]
        hours: i64,
    },
    /// Start a fleet update check
    Check,
    /// Start a dependency scan
    Scan,
    /// List background jobs
    Jobs,
    /// Request cancellation of a job
    Cancel { id: Uuid },
    /// Show apply history
    History {
        #[arg(long)]
        container: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show a container's decision trace
    Trace { container: String },
    /// Trigger an immediate orchestration sweep
    Sweep,
}

fn actor() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}

fn parse_status(raw: &str) -> Result<UpdateStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| anyhow::anyhow!("unknown status `{raw}`"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = DaemonClient::new(cli.socket.clone());

    let request = match &cli.command {
        Command::Status => Request::Status,
        Command::Containers => Request::ListContainers,
        Command::Updates { status } => Request::ListUpdates {
            status: status.as_deref().map(parse_status).transpose()?,
        },
        Command::Approve { id, version, reason } => Request::ApproveUpdate {
            id: *id,
            expected_version: *version,
            actor: actor(),
            reason: reason.clone(),
        },
        Command::Reject { id, version, reason } => Request::RejectUpdate {
            id: *id,
            expected_version: *version,
            actor: actor(),
            reason: reason.clone(),
        },
        Command::Snooze { id, version, hours } => Request::SnoozeUpdate {
            id: *id,
            expected_version: *version,
            until: chrono::Utc::now() + chrono::Duration::hours(*hours),
        },
        Command::Check => Request::StartCheck {
            triggered_by: actor(),
        },
        Command::Scan => Request::StartDependencyScan {
            triggered_by: actor(),
        },
        Command::Jobs => Request::ListJobs,
        Command::Cancel { id } => Request::CancelJob { id: *id },
        Command::History { container, limit } => Request::ListHistory {
            container: container.clone().map(ContainerId::new),
            limit: *limit,
        },
        Command::Trace { container } => Request::GetTrace {
            container: ContainerId::new(container.clone()),
        },
        Command::Sweep => Request::Sweep,
    };

    let response = client.request(&request).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    commands::render(&response)
}
