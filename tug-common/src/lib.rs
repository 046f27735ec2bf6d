//! Shared types and the update-decision engine for Tugboat.
//!
//! This crate is pure library code: entity definitions, version-scheme
//! classification, the policy/decision engine, configuration, errors, and
//! the daemon wire protocol. Everything with I/O or runtime state lives in
//! `tugd`.

pub mod config;
pub mod entities;
pub mod errors;
pub mod policy;
pub mod protocol;
pub mod types;
pub mod version;

pub use config::{ConfigWarning, DaemonConfig, WarningSeverity};
pub use entities::{
    ActionStamp, Container, CveDelta, DependencyRecord, Job, PollState, Update, UpdateHistoryEntry,
};
pub use errors::{ApplyError, ConfigError, ErrorCode, StoreError};
pub use policy::{
    CheckOutcome, Decision, EngineSettings, HoldReason, IgnoreRule, MaintenanceWindow, Proposal,
    RegistryObservation, TraceEntry, Verdict,
};
pub use protocol::{Request, Response, StatusInfo, SweepReport};
pub use types::{
    ChangeType, ContainerId, DependencyKind, HistoryStatus, JobKind, JobStatus, ReasonClass,
    Severity, UpdateKind, UpdatePolicy, UpdateScope, UpdateStatus, VersionTrack, WindowMode,
};
pub use version::{Comparison, VersionScheme};
