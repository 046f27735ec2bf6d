//! Error types and the operator-facing error catalog.
//!
//! Library errors are typed (`thiserror`); binaries wrap them with `anyhow`.
//! Apply errors carry an explicit transient/fatal split: transient failures
//! are eligible for the orchestrator's retry policy, fatal ones fail the
//! affected update immediately without consuming retries.

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use thiserror::Error;

/// Errors from the persistent entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    /// A concurrent actor mutated the row first. Swallowed at single-row
    /// granularity and retried next sweep; never a batch failure.
    #[error("version conflict on {entity} `{id}`: expected {expected}, found {found}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },
    #[error("invalid status transition for {entity} `{id}`: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },
    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this is the optimistic-lock conflict case.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Errors from applying an update through the container engine / registry.
#[derive(Debug, Clone, Error)]
pub enum ApplyError {
    #[error("registry request failed: {0}")]
    Registry(String),
    #[error("container engine request failed: {0}")]
    Engine(String),
    #[error("operation timed out after {0}s")]
    Timeout(u64),
    #[error("backup failed: {0}")]
    Backup(String),
    #[error("compose file missing: {0}")]
    ComposeFileMissing(String),
    #[error("dependency cycle involving: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("invalid maintenance window `{window}`: {error}")]
    InvalidWindow { window: String, error: String },
}

impl ApplyError {
    /// Transient failures retry with backoff; fatal ones fail immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Registry(_) | Self::Engine(_) | Self::Timeout(_) | Self::Backup(_)
        )
    }
}

/// Errors loading or validating daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),
    #[error("failed reading configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
