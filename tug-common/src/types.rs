//! Common types used across Tugboat components.

use serde::{Deserialize, Serialize};

/// Unique identifier for a monitored container.
///
/// Container names are unique per compose project, and Tugboat keys
/// everything (updates, history, dependency records) off this name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-container update policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Apply qualifying updates automatically.
    Auto,
    /// Record updates but never apply without operator approval.
    Monitor,
    /// Do not track updates for this container at all.
    Disabled,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self::Monitor
    }
}

impl std::fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Monitor => write!(f, "monitor"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Magnitude of a version change, highest-order differing component first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Patch,
    Minor,
    Major,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
        }
    }
}

/// Maximum change magnitude a container allows to auto-qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateScope {
    Patch,
    Minor,
    Major,
}

impl UpdateScope {
    /// Whether a change of the given magnitude falls inside this scope.
    pub fn allows(&self, change: ChangeType) -> bool {
        let ceiling = match self {
            Self::Patch => ChangeType::Patch,
            Self::Minor => ChangeType::Minor,
            Self::Major => ChangeType::Major,
        };
        change <= ceiling
    }
}

impl Default for UpdateScope {
    fn default() -> Self {
        Self::Minor
    }
}

impl std::fmt::Display for UpdateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
        }
    }
}

/// Operator override for version-scheme detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionTrack {
    Semver,
    Calver,
}

/// Whether an update replaces the tag or refreshes content under the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Tag,
    Digest,
}

/// Lifecycle status of an Update row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Detected, awaiting a decision or an apply slot.
    Pending,
    /// Operator approved, waiting for the orchestrator.
    Approved,
    /// Operator rejected; terminal.
    Rejected,
    /// Successfully applied; terminal.
    Applied,
    /// Apply failed after exhausting retries; terminal.
    Failed,
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Applied => write!(f, "applied"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Classification of why an update exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonClass {
    Security,
    Feature,
    Bugfix,
    Maintenance,
    Unknown,
}

impl Default for ReasonClass {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Outcome of one attempted apply, recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
    RolledBack,
}

/// Kind discriminant for background jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fleet-wide check for available updates.
    Check,
    /// Deep scan of per-container embedded dependencies.
    DependencyScan,
    /// Bounded polling of the external scanner after a container recreate.
    PendingScan,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Check => write!(f, "check"),
            Self::DependencyScan => write!(f, "dependency_scan"),
            Self::PendingScan => write!(f, "pending_scan"),
        }
    }
}

/// Lifecycle status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are retained for history and never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Enforcement mode for maintenance windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Refuse to apply outside the window; the update is re-queued.
    Strict,
    /// Apply anyway, with a warning recorded in the decision trace.
    Advisory,
}

impl Default for WindowMode {
    fn default() -> Self {
        Self::Advisory
    }
}

/// Kind discriminant for tracked sub-components of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Base image referenced by the container's Dockerfile.
    BaseImage,
    /// Language-ecosystem package embedded in the image.
    Package,
    /// Embedded HTTP server binary.
    HttpServer,
}

/// Severity attached to a dependency finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Unknown
    }
}
