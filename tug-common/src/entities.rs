//! Persisted entity rows: containers, updates, history, jobs, dependencies.
//!
//! Every mutable row carries a `version` counter for optimistic concurrency.
//! Writers read the counter, do their work, and only persist if the counter
//! is unchanged, incrementing it by one; the store enforces this.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::decision::TraceEntry;
use crate::policy::filter::IgnoreRule;
use crate::types::{
    ChangeType, ContainerId, DependencyKind, HistoryStatus, JobKind, JobStatus, ReasonClass,
    Severity, UpdateKind, UpdatePolicy, UpdateScope, UpdateStatus, VersionTrack,
};

/// A monitored deployable unit.
///
/// Created on discovery, mutated by every scan and every applied update,
/// never silently deleted while history rows reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Container name; unique within the fleet.
    pub id: ContainerId,
    /// Compose file this service is defined in.
    pub compose_file: PathBuf,
    /// Service name within the compose file.
    pub service: String,
    /// Compose project name.
    pub project: String,
    /// Image repository reference, without tag.
    pub image: String,
    /// Registry host serving the image.
    pub registry: String,
    /// Currently deployed tag.
    pub current_tag: String,
    /// Currently deployed content digest, when known.
    pub current_digest: Option<String>,
    /// Update policy.
    #[serde(default)]
    pub policy: UpdatePolicy,
    /// Maximum change magnitude allowed to auto-qualify.
    #[serde(default)]
    pub scope: UpdateScope,
    /// Operator override for scheme detection.
    #[serde(default)]
    pub version_track: Option<VersionTrack>,
    /// Prerelease inclusion; `None` inherits the global setting.
    #[serde(default)]
    pub include_prereleases: Option<bool>,
    /// Maintenance window expression, e.g. `mon-fri 22:00-06:00`.
    #[serde(default)]
    pub maintenance_window: Option<String>,
    /// Containers that must be updated (and healthy) before this one.
    #[serde(default)]
    pub depends_on: Vec<ContainerId>,
    /// Active ignore rule for this container's image updates.
    #[serde(default)]
    pub ignore: Option<IgnoreRule>,
    /// Best candidate rejected by scope under the same scheme. Informational,
    /// cleared at the start of every scan.
    #[serde(default)]
    pub latest_major_tag: Option<String>,
    /// Best candidate rejected because it is CalVer while the current version
    /// is not. Informational, cleared at the start of every scan.
    #[serde(default)]
    pub calver_blocked_tag: Option<String>,
    /// Optimistic-lock counter.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    pub fn new(
        id: ContainerId,
        compose_file: PathBuf,
        service: impl Into<String>,
        project: impl Into<String>,
        image: impl Into<String>,
        registry: impl Into<String>,
        current_tag: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            compose_file,
            service: service.into(),
            project: project.into(),
            image: image.into(),
            registry: registry.into(),
            current_tag: current_tag.into(),
            current_digest: None,
            policy: UpdatePolicy::default(),
            scope: UpdateScope::default(),
            version_track: None,
            include_prereleases: None,
            maintenance_window: None,
            depends_on: Vec::new(),
            ignore: None,
            latest_major_tag: None,
            calver_blocked_tag: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Actor + timestamp + reason for an approve/reject action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStamp {
    pub actor: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// CVE delta between the current and candidate image, consumed opaquely from
/// the external vulnerability scanner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CveDelta {
    /// CVE ids resolved by moving to the candidate.
    #[serde(default)]
    pub resolved: Vec<String>,
    /// CVE ids newly introduced by the candidate.
    #[serde(default)]
    pub introduced: Vec<String>,
    /// Severity counts for the candidate image.
    #[serde(default)]
    pub critical: u32,
    #[serde(default)]
    pub high: u32,
    #[serde(default)]
    pub medium: u32,
    #[serde(default)]
    pub low: u32,
}

/// One detected, pending-or-resolved change proposal for a container.
///
/// A container has at most one unresolved (`pending`) update at a time; scans
/// reconcile the existing row in place instead of duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub id: Uuid,
    pub container: ContainerId,
    pub from_tag: String,
    pub to_tag: String,
    pub registry: String,
    #[serde(default)]
    pub reason: ReasonClass,
    #[serde(default)]
    pub cve_delta: CveDelta,
    pub status: UpdateStatus,
    pub update_kind: UpdateKind,
    #[serde(default)]
    pub change_type: Option<ChangeType>,
    /// True when a larger out-of-scope candidate also exists.
    #[serde(default)]
    pub scope_violation: bool,
    #[serde(default)]
    pub decision_trace: Vec<TraceEntry>,
    // Retry bookkeeping.
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub backoff_multiplier: u32,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    // Operator actions.
    #[serde(default)]
    pub approval: Option<ActionStamp>,
    #[serde(default)]
    pub rejection: Option<ActionStamp>,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
    /// Optimistic-lock counter, incremented on every mutating transition.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Update {
    /// Valid status transitions. `applied` is reachable straight from
    /// `pending` when policy is auto and nothing gates the apply.
    pub fn can_transition_to(&self, to: UpdateStatus) -> bool {
        use UpdateStatus::*;
        matches!(
            (self.status, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Applied)
                | (Pending, Failed)
                | (Approved, Applied)
                | (Approved, Failed)
        )
    }

    /// Whether this row still awaits a resolution.
    pub fn is_unresolved(&self) -> bool {
        matches!(self.status, UpdateStatus::Pending | UpdateStatus::Approved)
    }

    /// Append a trace entry. The trace is append-only: it is the audit
    /// record any blocked or auto-applied outcome must be reconstructable
    /// from.
    pub fn record_trace(&mut self, entry: TraceEntry) {
        self.decision_trace.push(entry);
    }

    /// Whether the update is eligible for the orchestrator at `now`:
    /// approved (or auto-pending), not snoozed, and past any retry backoff.
    pub fn is_due(&self, auto_policy: bool, now: DateTime<Utc>) -> bool {
        let status_ok = match self.status {
            UpdateStatus::Approved => true,
            UpdateStatus::Pending => auto_policy,
            _ => false,
        };
        if !status_ok {
            return false;
        }
        if let Some(until) = self.snoozed_until
            && until > now
        {
            return false;
        }
        if let Some(at) = self.next_retry_at
            && at > now
        {
            return false;
        }
        true
    }
}

/// Immutable audit record of one attempted apply.
///
/// Only the rollback marker may change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateHistoryEntry {
    pub id: Uuid,
    pub container: ContainerId,
    pub from_tag: String,
    pub to_tag: String,
    pub status: HistoryStatus,
    pub duration_ms: u64,
    /// Compose-file snapshot captured before the apply.
    #[serde(default)]
    pub backup_path: Option<String>,
    /// Optional volume/data backup reference.
    #[serde(default)]
    pub data_backup_id: Option<String>,
    #[serde(default)]
    pub data_backup_status: Option<String>,
    /// Whether a consistent backup exists to roll back to.
    pub can_rollback: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded-retry polling state carried by pending-scan jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollState {
    /// Container whose recreate we are waiting on the scanner to notice.
    pub container: ContainerId,
    #[serde(default)]
    pub poll_count: u32,
    pub max_polls: u32,
    #[serde(default)]
    pub trigger_attempt_count: u32,
    pub max_trigger_attempts: u32,
    #[serde(default)]
    pub last_trigger_attempt_at: Option<DateTime<Utc>>,
}

/// A persisted background job.
///
/// Jobs survive restarts: state is written before each unit of work, so a
/// crashed run is recovered as `failed` rather than silently lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub found_count: u64,
    #[serde(default)]
    pub errors_count: u64,
    #[serde(default)]
    pub cancel_requested: bool,
    pub triggered_by: String,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Present only for pending-scan jobs.
    #[serde(default)]
    pub poll: Option<PollState>,
    /// Optimistic-lock counter.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, triggered_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Queued,
            total_count: 0,
            processed_count: 0,
            found_count: 0,
            errors_count: 0,
            cancel_requested: false,
            triggered_by: triggered_by.into(),
            error_message: None,
            poll: None,
            version: 1,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Progress as a whole percentage; a zero total reports 0%, not an error.
    pub fn progress_percent(&self) -> u8 {
        if self.total_count == 0 {
            return 0;
        }
        ((self.processed_count.min(self.total_count) * 100) / self.total_count) as u8
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }
}

/// A tracked sub-component of a container (base image, package, embedded
/// server). Same lifecycle shape as [`Update`], scoped below the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub id: Uuid,
    pub container: ContainerId,
    pub kind: DependencyKind,
    pub name: String,
    /// Package ecosystem (`npm`, `pip`, ...) when `kind` is `package`.
    #[serde(default)]
    pub ecosystem: Option<String>,
    pub current_version: String,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub ignore: Option<IgnoreRule>,
    /// Optimistic-lock counter.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl DependencyRecord {
    pub fn new(
        container: ContainerId,
        kind: DependencyKind,
        name: impl Into<String>,
        current_version: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            container,
            kind,
            name: name.into(),
            ecosystem: None,
            current_version: current_version.into(),
            latest_version: None,
            severity: Severity::default(),
            ignore: None,
            version: 1,
            updated_at: Utc::now(),
        }
    }
}
