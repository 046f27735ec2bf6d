//! Error catalog for Tugboat.
//!
//! Operator-facing failures map to stable codes with remediation steps, so
//! log lines and API error payloads can reference `TUG-Exxx` instead of
//! free-form prose.
//!
//! # Error Code Ranges
//!
//! | Range      | Category      | Description                          |
//! |------------|---------------|--------------------------------------|
//! | E001-E099  | Config        | Configuration and setup errors       |
//! | E100-E199  | Registry      | Registry and container engine        |
//! | E200-E299  | Jobs          | Background job lifecycle             |
//! | E300-E399  | Orchestration | Update application and rollback      |
//! | E500-E599  | Internal      | Internal/unexpected errors           |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering operator-facing Tugboat failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Config (E001-E099)
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Maintenance window expression failed to parse
    ConfigInvalidWindow,
    /// Fleet-scan cron schedule failed to parse
    ConfigInvalidSchedule,

    // Registry / engine (E100-E199)
    /// Registry tag listing failed
    RegistryListFailed,
    /// Registry digest lookup failed
    RegistryDigestFailed,
    /// Registry or engine call timed out
    UpstreamTimeout,
    /// Container engine recreate failed
    EngineRecreateFailed,

    // Jobs (E200-E299)
    /// A job of this kind is already queued or running
    JobAlreadyRunning,
    /// Job was cancelled before completion
    JobCancelled,
    /// Pending-scan polling exhausted its retry budget
    JobPollBudgetExhausted,
    /// Job found running after a restart and orphaned
    JobOrphaned,

    // Orchestration (E300-E399)
    /// Update apply failed after exhausting retries
    ApplyRetriesExhausted,
    /// Dependency cycle excluded containers from the batch
    OrderingCycle,
    /// Optimistic-lock conflict, another actor mutated the row
    VersionConflict,
    /// Rollback failed or no consistent backup exists
    RollbackUnavailable,

    // Internal (E500-E599)
    /// Unexpected internal error
    Internal,
}

/// Category derived from an error code's numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Registry,
    Jobs,
    Orchestration,
    Internal,
}

/// One catalog entry: stable code, message, remediation steps.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub code: &'static str,
    pub category: ErrorCategory,
    pub message: &'static str,
    pub remediation: &'static [&'static str],
}

impl ErrorCode {
    /// Look up the catalog entry for this code.
    pub fn entry(&self) -> ErrorEntry {
        match self {
            Self::ConfigNotFound => ErrorEntry {
                code: "TUG-E001",
                category: ErrorCategory::Config,
                message: "Configuration file not found",
                remediation: &[
                    "Create a config file under ~/.config/tugboat/config.toml",
                    "Or pass --config with an explicit path",
                ],
            },
            Self::ConfigParseError => ErrorEntry {
                code: "TUG-E002",
                category: ErrorCategory::Config,
                message: "Configuration file contains invalid TOML",
                remediation: &["Check the reported line for syntax errors"],
            },
            Self::ConfigValidationError => ErrorEntry {
                code: "TUG-E003",
                category: ErrorCategory::Config,
                message: "Configuration contains invalid values",
                remediation: &["Review the validation warnings logged at startup"],
            },
            Self::ConfigInvalidWindow => ErrorEntry {
                code: "TUG-E004",
                category: ErrorCategory::Config,
                message: "Maintenance window expression failed to parse",
                remediation: &[
                    "Use the form `mon-fri 22:00-06:00` or `daily 03:00-05:00`",
                ],
            },
            Self::ConfigInvalidSchedule => ErrorEntry {
                code: "TUG-E005",
                category: ErrorCategory::Config,
                message: "Fleet-scan cron schedule failed to parse",
                remediation: &["Use a standard cron expression, e.g. `0 0 3 * * *`"],
            },
            Self::RegistryListFailed => ErrorEntry {
                code: "TUG-E100",
                category: ErrorCategory::Registry,
                message: "Registry tag listing failed",
                remediation: &[
                    "Check network connectivity to the registry",
                    "Verify the image repository still exists",
                ],
            },
            Self::RegistryDigestFailed => ErrorEntry {
                code: "TUG-E101",
                category: ErrorCategory::Registry,
                message: "Registry digest lookup failed",
                remediation: &["Check network connectivity to the registry"],
            },
            Self::UpstreamTimeout => ErrorEntry {
                code: "TUG-E102",
                category: ErrorCategory::Registry,
                message: "Registry or container engine call timed out",
                remediation: &[
                    "Timeouts are retried automatically with backoff",
                    "Raise scan.registry_timeout_secs if the upstream is slow",
                ],
            },
            Self::EngineRecreateFailed => ErrorEntry {
                code: "TUG-E103",
                category: ErrorCategory::Registry,
                message: "Container engine failed to recreate the service",
                remediation: &[
                    "Inspect the engine logs for the named service",
                    "A consistent backup is kept for rollback",
                ],
            },
            Self::JobAlreadyRunning => ErrorEntry {
                code: "TUG-E200",
                category: ErrorCategory::Jobs,
                message: "A job of this kind is already queued or running",
                remediation: &[
                    "Wait for the running job or cancel it with `tug jobs cancel`",
                ],
            },
            Self::JobCancelled => ErrorEntry {
                code: "TUG-E201",
                category: ErrorCategory::Jobs,
                message: "Job was cancelled before completion",
                remediation: &["Partial results up to the last checkpoint were kept"],
            },
            Self::JobPollBudgetExhausted => ErrorEntry {
                code: "TUG-E202",
                category: ErrorCategory::Jobs,
                message: "Pending-scan polling exhausted its retry budget",
                remediation: &[
                    "The external scanner never discovered the recreated container",
                    "Trigger a new dependency scan once the scanner has caught up",
                ],
            },
            Self::JobOrphaned => ErrorEntry {
                code: "TUG-E203",
                category: ErrorCategory::Jobs,
                message: "Job was found running after a restart and marked failed",
                remediation: &["Start a fresh job; the orphaned one kept partial progress"],
            },
            Self::ApplyRetriesExhausted => ErrorEntry {
                code: "TUG-E300",
                category: ErrorCategory::Orchestration,
                message: "Update apply failed after exhausting retries",
                remediation: &[
                    "See the update's last_error for the final failure",
                    "Approve again to reset retry bookkeeping",
                ],
            },
            Self::OrderingCycle => ErrorEntry {
                code: "TUG-E301",
                category: ErrorCategory::Orchestration,
                message: "Dependency cycle excluded containers from the batch",
                remediation: &[
                    "Break the cycle in the containers' depends_on lists",
                    "Unaffected containers were still processed",
                ],
            },
            Self::VersionConflict => ErrorEntry {
                code: "TUG-E302",
                category: ErrorCategory::Orchestration,
                message: "Another actor mutated this row concurrently",
                remediation: &["Re-read the row and retry with its current version"],
            },
            Self::RollbackUnavailable => ErrorEntry {
                code: "TUG-E303",
                category: ErrorCategory::Orchestration,
                message: "No consistent backup exists to roll back to",
                remediation: &["Recover the service manually from the compose file"],
            },
            Self::Internal => ErrorEntry {
                code: "TUG-E500",
                category: ErrorCategory::Internal,
                message: "Unexpected internal error",
                remediation: &["This is a bug; please file an issue with the daemon log"],
            },
        }
    }

    /// The stable `TUG-Exxx` code string.
    pub fn code_string(&self) -> &'static str {
        self.entry().code
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = self.entry();
        write!(f, "{}: {}", entry.code, entry.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 18] = [
        ErrorCode::ConfigNotFound,
        ErrorCode::ConfigParseError,
        ErrorCode::ConfigValidationError,
        ErrorCode::ConfigInvalidWindow,
        ErrorCode::ConfigInvalidSchedule,
        ErrorCode::RegistryListFailed,
        ErrorCode::RegistryDigestFailed,
        ErrorCode::UpstreamTimeout,
        ErrorCode::EngineRecreateFailed,
        ErrorCode::JobAlreadyRunning,
        ErrorCode::JobCancelled,
        ErrorCode::JobPollBudgetExhausted,
        ErrorCode::JobOrphaned,
        ErrorCode::ApplyRetriesExhausted,
        ErrorCode::OrderingCycle,
        ErrorCode::VersionConflict,
        ErrorCode::RollbackUnavailable,
        ErrorCode::Internal,
    ];

    #[test]
    fn codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.entry().code), "duplicate {:?}", code);
        }
    }

    #[test]
    fn codes_sit_in_their_category_range() {
        for code in ALL {
            let entry = code.entry();
            let number: u32 = entry.code.trim_start_matches("TUG-E").parse().unwrap();
            let expected = match entry.category {
                ErrorCategory::Config => (1..100).contains(&number),
                ErrorCategory::Registry => (100..200).contains(&number),
                ErrorCategory::Jobs => (200..300).contains(&number),
                ErrorCategory::Orchestration => (300..400).contains(&number),
                ErrorCategory::Internal => (500..600).contains(&number),
            };
            assert!(expected, "{} out of range for {:?}", entry.code, entry.category);
        }
    }

    #[test]
    fn every_entry_has_remediation() {
        for code in ALL {
            assert!(
                !code.entry().remediation.is_empty(),
                "{:?} lacks remediation",
                code
            );
        }
    }

    #[test]
    fn display_includes_code_and_message() {
        let rendered = ErrorCode::JobAlreadyRunning.to_string();
        assert!(rendered.starts_with("TUG-E200"));
        assert!(rendered.contains("already queued or running"));
    }
}
