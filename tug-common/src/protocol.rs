//! Daemon API protocol.
//!
//! The CLI talks to `tugd` over a Unix socket with newline-delimited JSON:
//! one [`Request`] per line in, one [`Response`] per line out. Mutating
//! requests carry the row `version` the caller last observed so the daemon
//! can reject lost-update races.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Container, Job, Update, UpdateHistoryEntry};
use crate::policy::decision::TraceEntry;
use crate::types::{ContainerId, UpdateStatus};

/// A request from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Daemon status summary.
    Status,
    /// All monitored containers.
    ListContainers,
    /// Effective decision trace for one container's current update.
    GetTrace { container: ContainerId },
    /// Updates, optionally filtered by status.
    ListUpdates {
        #[serde(default)]
        status: Option<UpdateStatus>,
    },
    /// Approve a pending update.
    ApproveUpdate {
        id: Uuid,
        /// Row version the caller last observed.
        expected_version: u64,
        actor: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Reject a pending update.
    RejectUpdate {
        id: Uuid,
        expected_version: u64,
        actor: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Snooze an unresolved update until a timestamp.
    SnoozeUpdate {
        id: Uuid,
        expected_version: u64,
        until: DateTime<Utc>,
    },
    /// Start a fleet check job.
    StartCheck { triggered_by: String },
    /// Start a dependency scan job.
    StartDependencyScan { triggered_by: String },
    /// All background jobs, newest first.
    ListJobs,
    /// Request cooperative cancellation of a job.
    CancelJob { id: Uuid },
    /// Apply history, optionally filtered by container.
    ListHistory {
        #[serde(default)]
        container: Option<ContainerId>,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
    /// Trigger an immediate orchestration sweep.
    Sweep,
}

fn default_history_limit() -> usize {
    50
}

/// Daemon status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub version: String,
    pub pid: u32,
    pub uptime_secs: u64,
    pub containers: usize,
    pub pending_updates: usize,
    pub running_jobs: usize,
}

/// Result of one orchestration sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub applied: usize,
    /// Terminal failures (retries exhausted or fatal error).
    pub failed: usize,
    /// Transient failures rescheduled with backoff.
    pub retried: usize,
    /// Deferred by a strict maintenance window.
    pub deferred: usize,
    /// Aborted by an optimistic-lock conflict; retried next sweep.
    pub conflicts: usize,
    /// Containers excluded by a dependency cycle this sweep.
    #[serde(default)]
    pub excluded: Vec<ContainerId>,
}

/// A response from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Status(StatusInfo),
    Containers { containers: Vec<Container> },
    Trace { entries: Vec<TraceEntry> },
    Updates { updates: Vec<Update> },
    /// Returned by mutating update operations with the fresh row.
    Update { update: Box<Update> },
    /// Returned by job-start operations. `already_running` means no new job
    /// was created and `id` names the existing one.
    JobStarted { id: Uuid, already_running: bool },
    Jobs { jobs: Vec<Job> },
    CancelRequested { id: Uuid },
    History { entries: Vec<UpdateHistoryEntry> },
    Sweep { report: SweepReport },
    Error { code: String, message: String },
}

impl Response {
    /// Build an error response from a catalog code and detail message.
    pub fn error(code: crate::errors::ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.code_string().to_string(),
            message: message.into(),
        }
    }
}
