//! The decision engine: policy + ignore + scope + window composed into a
//! verdict with an ordered, typed decision trace.
//!
//! The trace is the system's explainability contract. Every rule evaluated
//! appends exactly one entry, and any blocked or auto-applied outcome must be
//! reconstructable from the trace alone. Entries are a closed enum so
//! consumers can match exhaustively.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::entities::{Container, CveDelta};
use crate::policy::filter::{self, IgnoreRule};
use crate::policy::window::MaintenanceWindow;
use crate::types::{ChangeType, ReasonClass, UpdateKind, UpdatePolicy, UpdateScope, WindowMode};
use crate::version::{self, VersionScheme};

/// Outcome of one evaluated rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Pass,
    Block,
    Warn,
}

/// One evaluated rule in a decision trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TraceEntry {
    /// Container policy gate.
    PolicyCheck {
        policy: UpdatePolicy,
        outcome: CheckOutcome,
    },
    /// An ignore rule was consulted for a candidate.
    IgnoreCheck {
        #[serde(rename = "ignore")]
        rule_value: IgnoreRule,
        candidate: String,
        matched: bool,
    },
    /// Scope ceiling evaluated against a candidate's change magnitude.
    ScopeCheck {
        scope: UpdateScope,
        change: Option<ChangeType>,
        candidate: String,
        outcome: CheckOutcome,
    },
    /// Maintenance window evaluated at decision or apply time.
    WindowCheck {
        window: String,
        mode: WindowMode,
        inside: bool,
        outcome: CheckOutcome,
    },
    /// The window expression itself failed to parse.
    WindowInvalid { window: String, error: String },
    /// A scan rewrote a pending row to a newer target in place.
    Reconciled {
        previous_target: String,
        new_target: String,
    },
}

/// Why an auto-policy update is held instead of queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    OutsideMaintenanceWindow,
    InvalidWindowExpression,
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutsideMaintenanceWindow => write!(f, "outside maintenance window"),
            Self::InvalidWindowExpression => write!(f, "invalid maintenance window expression"),
        }
    }
}

/// Final verdict for one container in one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Policy is disabled; no update row is ever created.
    Disabled,
    /// No qualifying candidate.
    UpToDate,
    /// Record the update, never auto-apply.
    Monitor,
    /// Auto policy, all gates passed: hand to the orchestrator.
    Queue,
    /// Auto policy, but a gate blocks for now; stays pending.
    Hold { reason: HoldReason },
}

/// A concrete change proposal extracted from the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub to_tag: String,
    pub update_kind: UpdateKind,
    pub change_type: Option<ChangeType>,
    /// True when a larger out-of-scope candidate was also observed.
    pub scope_violation: bool,
}

/// What the registry reported for a container during this scan.
#[derive(Debug, Clone, Default)]
pub struct RegistryObservation {
    /// Tags available for the image.
    pub tags: Vec<String>,
    /// Content digest currently served for the container's own tag.
    pub current_tag_digest: Option<String>,
}

/// Engine settings snapshot, loaded once per sweep and passed explicitly.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Global prerelease default, inherited when the container is unset.
    pub include_prereleases: bool,
    /// Maintenance window enforcement.
    pub window_mode: WindowMode,
    /// Retry defaults stamped onto new update rows.
    pub max_retries: u32,
    pub backoff_multiplier: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            include_prereleases: false,
            window_mode: WindowMode::Advisory,
            max_retries: 3,
            backoff_multiplier: 3,
        }
    }
}

/// The full decision for one container.
#[derive(Debug, Clone)]
pub struct Decision {
    pub verdict: Verdict,
    pub proposal: Option<Proposal>,
    pub trace: Vec<TraceEntry>,
    pub scheme: VersionScheme,
    /// Informational: best candidate rejected by scope under the same scheme.
    pub latest_major_tag: Option<String>,
    /// Informational: best CalVer candidate while current version is not.
    pub calver_blocked_tag: Option<String>,
    /// Ignore rule that went stale this scan and should be cleared.
    pub clear_ignore: bool,
}

/// Evaluate one container against a registry observation.
///
/// Pure: the clock is injected as `now` and all configuration arrives in the
/// settings snapshot, so verdicts are deterministic and testable.
pub fn evaluate(
    container: &Container,
    observation: &RegistryObservation,
    settings: &EngineSettings,
    now: NaiveDateTime,
) -> Decision {
    let scheme = version::effective_scheme(container.version_track, &observation.tags);
    let mut decision = Decision {
        verdict: Verdict::UpToDate,
        proposal: None,
        trace: Vec::new(),
        scheme,
        latest_major_tag: None,
        calver_blocked_tag: None,
        clear_ignore: false,
    };

    if container.policy == UpdatePolicy::Disabled {
        decision.trace.push(TraceEntry::PolicyCheck {
            policy: UpdatePolicy::Disabled,
            outcome: CheckOutcome::Block,
        });
        decision.verdict = Verdict::Disabled;
        return decision;
    }
    decision.trace.push(TraceEntry::PolicyCheck {
        policy: container.policy,
        outcome: CheckOutcome::Pass,
    });

    let include_prereleases = container
        .include_prereleases
        .unwrap_or(settings.include_prereleases);
    let selection = filter::select_candidate(
        &container.current_tag,
        &observation.tags,
        scheme,
        container.scope,
        container.ignore.as_ref(),
        include_prereleases,
    );

    for candidate in &selection.ignored {
        if let Some(rule) = &container.ignore {
            decision.trace.push(TraceEntry::IgnoreCheck {
                rule_value: rule.clone(),
                candidate: candidate.clone(),
                matched: true,
            });
        }
    }
    if let Some(blocked) = &selection.blocked_by_scope {
        decision.trace.push(TraceEntry::ScopeCheck {
            scope: container.scope,
            change: blocked.change,
            candidate: blocked.candidate.clone(),
            outcome: CheckOutcome::Block,
        });
        decision.latest_major_tag = Some(blocked.candidate.clone());
    }
    decision.calver_blocked_tag = selection.calver_blocked.clone();

    // Stale-ignore detection: the highest candidate this scan decides whether
    // the rule is still meaningful (exact clears on any move, prefix only
    // when the prefix itself changes).
    if let Some(rule) = &container.ignore {
        let top = selection
            .proposed
            .as_ref()
            .map(|c| c.candidate.as_str())
            .or_else(|| selection.ignored.first().map(|c| c.as_str()))
            .or_else(|| {
                selection
                    .blocked_by_scope
                    .as_ref()
                    .map(|c| c.candidate.as_str())
            });
        if let Some(top) = top
            && rule.is_stale(top)
        {
            decision.clear_ignore = true;
        }
    }

    let proposal = if let Some(chosen) = selection.proposed {
        decision.trace.push(TraceEntry::ScopeCheck {
            scope: container.scope,
            change: chosen.change,
            candidate: chosen.candidate.clone(),
            outcome: CheckOutcome::Pass,
        });
        Some(Proposal {
            to_tag: chosen.candidate,
            update_kind: UpdateKind::Tag,
            change_type: chosen.change,
            scope_violation: decision.latest_major_tag.is_some(),
        })
    } else {
        digest_proposal(container, observation)
    };

    let Some(proposal) = proposal else {
        return decision;
    };

    match container.policy {
        UpdatePolicy::Monitor => {
            decision.verdict = Verdict::Monitor;
            decision.proposal = Some(proposal);
            return decision;
        }
        UpdatePolicy::Auto => {}
        UpdatePolicy::Disabled => unreachable!("disabled returned above"),
    }

    // Auto policy: the maintenance window is the remaining gate. Digest
    // refreshes are always in scope but still subject to the window.
    decision.verdict = match &container.maintenance_window {
        None => Verdict::Queue,
        Some(expr) => match MaintenanceWindow::parse(expr) {
            Err(err) => {
                decision.trace.push(TraceEntry::WindowInvalid {
                    window: expr.clone(),
                    error: err.to_string(),
                });
                Verdict::Hold {
                    reason: HoldReason::InvalidWindowExpression,
                }
            }
            Ok(window) => {
                let inside = window.contains(now);
                match (inside, settings.window_mode) {
                    (true, _) => {
                        decision.trace.push(TraceEntry::WindowCheck {
                            window: expr.clone(),
                            mode: settings.window_mode,
                            inside: true,
                            outcome: CheckOutcome::Pass,
                        });
                        Verdict::Queue
                    }
                    (false, WindowMode::Advisory) => {
                        decision.trace.push(TraceEntry::WindowCheck {
                            window: expr.clone(),
                            mode: WindowMode::Advisory,
                            inside: false,
                            outcome: CheckOutcome::Warn,
                        });
                        Verdict::Queue
                    }
                    (false, WindowMode::Strict) => {
                        decision.trace.push(TraceEntry::WindowCheck {
                            window: expr.clone(),
                            mode: WindowMode::Strict,
                            inside: false,
                            outcome: CheckOutcome::Block,
                        });
                        Verdict::Hold {
                            reason: HoldReason::OutsideMaintenanceWindow,
                        }
                    }
                }
            }
        },
    };
    decision.proposal = Some(proposal);
    decision
}

/// Digest-based refresh: same tag, different content. Always within scope —
/// it is a content refresh, not a version bump — but policy and windows still
/// apply.
fn digest_proposal(container: &Container, observation: &RegistryObservation) -> Option<Proposal> {
    let remote = observation.current_tag_digest.as_deref()?;
    let local = container.current_digest.as_deref()?;
    if remote == local {
        return None;
    }
    Some(Proposal {
        to_tag: container.current_tag.clone(),
        update_kind: UpdateKind::Digest,
        change_type: None,
        scope_violation: false,
    })
}

/// Classify the reason for an update from its change magnitude and CVE delta.
pub fn classify_reason(change: Option<ChangeType>, cve_delta: &CveDelta) -> ReasonClass {
    if !cve_delta.resolved.is_empty() {
        return ReasonClass::Security;
    }
    match change {
        Some(ChangeType::Patch) => ReasonClass::Bugfix,
        Some(ChangeType::Minor) | Some(ChangeType::Major) => ReasonClass::Feature,
        None => ReasonClass::Maintenance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerId;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn container(policy: UpdatePolicy, scope: UpdateScope, tag: &str) -> Container {
        let mut c = Container::new(
            ContainerId::new("app"),
            PathBuf::from("/srv/app/docker-compose.yml"),
            "app",
            "homelab",
            "library/app",
            "docker.io",
            tag,
        );
        c.policy = policy;
        c.scope = scope;
        c
    }

    fn observation(tags: &[&str]) -> RegistryObservation {
        RegistryObservation {
            tags: tags.iter().map(|s| s.to_string()).collect(),
            current_tag_digest: None,
        }
    }

    fn noon() -> NaiveDateTime {
        // 2026-08-03 is a Monday.
        NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn disabled_policy_short_circuits() {
        let c = container(UpdatePolicy::Disabled, UpdateScope::Major, "1.0.0");
        let d = evaluate(
            &c,
            &observation(&["1.0.0", "2.0.0"]),
            &EngineSettings::default(),
            noon(),
        );
        assert_eq!(d.verdict, Verdict::Disabled);
        assert!(d.proposal.is_none());
        assert_eq!(d.trace.len(), 1);
        assert!(matches!(
            d.trace[0],
            TraceEntry::PolicyCheck {
                policy: UpdatePolicy::Disabled,
                outcome: CheckOutcome::Block,
            }
        ));
    }

    #[test]
    fn monitor_policy_records_but_never_queues() {
        let c = container(UpdatePolicy::Monitor, UpdateScope::Minor, "1.2.0");
        let d = evaluate(
            &c,
            &observation(&["1.2.0", "1.3.0"]),
            &EngineSettings::default(),
            noon(),
        );
        assert_eq!(d.verdict, Verdict::Monitor);
        assert_eq!(d.proposal.as_ref().unwrap().to_tag, "1.3.0");
    }

    #[test]
    fn auto_policy_queues_when_nothing_gates() {
        let c = container(UpdatePolicy::Auto, UpdateScope::Minor, "1.2.0");
        let d = evaluate(
            &c,
            &observation(&["1.2.0", "1.3.0"]),
            &EngineSettings::default(),
            noon(),
        );
        assert_eq!(d.verdict, Verdict::Queue);
    }

    #[test]
    fn scope_block_surfaces_latest_major_and_flags_violation() {
        let c = container(UpdatePolicy::Auto, UpdateScope::Minor, "1.2.0");
        let d = evaluate(
            &c,
            &observation(&["1.2.0", "1.3.0", "2.0.0"]),
            &EngineSettings::default(),
            noon(),
        );
        assert_eq!(d.verdict, Verdict::Queue);
        let proposal = d.proposal.unwrap();
        assert_eq!(proposal.to_tag, "1.3.0");
        assert!(proposal.scope_violation);
        assert_eq!(d.latest_major_tag.as_deref(), Some("2.0.0"));
        assert!(d.trace.iter().any(|e| matches!(
            e,
            TraceEntry::ScopeCheck {
                outcome: CheckOutcome::Block,
                ..
            }
        )));
    }

    #[test]
    fn only_out_of_scope_candidates_yield_no_proposal() {
        let c = container(UpdatePolicy::Auto, UpdateScope::Minor, "1.2.0");
        let d = evaluate(
            &c,
            &observation(&["1.2.0", "2.0.0"]),
            &EngineSettings::default(),
            noon(),
        );
        assert_eq!(d.verdict, Verdict::UpToDate);
        assert!(d.proposal.is_none());
        assert_eq!(d.latest_major_tag.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn strict_window_holds_outside_advisory_warns_through() {
        let mut c = container(UpdatePolicy::Auto, UpdateScope::Minor, "1.2.0");
        c.maintenance_window = Some("daily 22:00-06:00".to_string());
        let obs = observation(&["1.2.0", "1.3.0"]);

        let strict = EngineSettings {
            window_mode: WindowMode::Strict,
            ..EngineSettings::default()
        };
        let d = evaluate(&c, &obs, &strict, noon());
        assert_eq!(
            d.verdict,
            Verdict::Hold {
                reason: HoldReason::OutsideMaintenanceWindow
            }
        );
        assert!(d.proposal.is_some(), "held update still carries a proposal");

        let advisory = EngineSettings {
            window_mode: WindowMode::Advisory,
            ..EngineSettings::default()
        };
        let d = evaluate(&c, &obs, &advisory, noon());
        assert_eq!(d.verdict, Verdict::Queue);
        assert!(d.trace.iter().any(|e| matches!(
            e,
            TraceEntry::WindowCheck {
                outcome: CheckOutcome::Warn,
                inside: false,
                ..
            }
        )));
    }

    #[test]
    fn invalid_window_expression_holds_without_retry_semantics() {
        let mut c = container(UpdatePolicy::Auto, UpdateScope::Minor, "1.2.0");
        c.maintenance_window = Some("whenever".to_string());
        let d = evaluate(
            &c,
            &observation(&["1.2.0", "1.3.0"]),
            &EngineSettings::default(),
            noon(),
        );
        assert_eq!(
            d.verdict,
            Verdict::Hold {
                reason: HoldReason::InvalidWindowExpression
            }
        );
        assert!(
            d.trace
                .iter()
                .any(|e| matches!(e, TraceEntry::WindowInvalid { .. }))
        );
    }

    #[test]
    fn digest_refresh_is_proposed_when_tags_are_quiet() {
        let mut c = container(UpdatePolicy::Auto, UpdateScope::Minor, "1.2.0");
        c.current_digest = Some("sha256:aaa".to_string());
        let obs = RegistryObservation {
            tags: vec!["1.2.0".to_string()],
            current_tag_digest: Some("sha256:bbb".to_string()),
        };
        let d = evaluate(&c, &obs, &EngineSettings::default(), noon());
        assert_eq!(d.verdict, Verdict::Queue);
        let p = d.proposal.unwrap();
        assert_eq!(p.update_kind, UpdateKind::Digest);
        assert_eq!(p.change_type, None);
        assert_eq!(p.to_tag, "1.2.0");
    }

    #[test]
    fn digest_refresh_respects_strict_windows() {
        let mut c = container(UpdatePolicy::Auto, UpdateScope::Patch, "1.2.0");
        c.current_digest = Some("sha256:aaa".to_string());
        c.maintenance_window = Some("daily 22:00-06:00".to_string());
        let obs = RegistryObservation {
            tags: vec!["1.2.0".to_string()],
            current_tag_digest: Some("sha256:bbb".to_string()),
        };
        let settings = EngineSettings {
            window_mode: WindowMode::Strict,
            ..EngineSettings::default()
        };
        let d = evaluate(&c, &obs, &settings, noon());
        assert_eq!(
            d.verdict,
            Verdict::Hold {
                reason: HoldReason::OutsideMaintenanceWindow
            }
        );
    }

    #[test]
    fn stale_exact_ignore_is_flagged_for_clearing() {
        let mut c = container(UpdatePolicy::Auto, UpdateScope::Minor, "1.2.0");
        c.ignore = Some(IgnoreRule::Exact("1.2.5".to_string()));
        let d = evaluate(
            &c,
            &observation(&["1.2.0", "1.3.0"]),
            &EngineSettings::default(),
            noon(),
        );
        assert!(d.clear_ignore, "candidate moved past the ignored version");
    }

    #[test]
    fn live_prefix_ignore_is_kept() {
        let mut c = container(UpdatePolicy::Auto, UpdateScope::Minor, "3.15.0");
        c.ignore = Some(IgnoreRule::Prefix("3.15".to_string()));
        let d = evaluate(
            &c,
            &observation(&["3.15.0", "3.15.2"]),
            &EngineSettings::default(),
            noon(),
        );
        assert!(!d.clear_ignore);
        assert_eq!(d.verdict, Verdict::UpToDate);
        assert!(d.trace.iter().any(|e| matches!(
            e,
            TraceEntry::IgnoreCheck { matched: true, .. }
        )));
    }

    #[test]
    fn reason_classification() {
        let clean = CveDelta::default();
        assert_eq!(
            classify_reason(Some(ChangeType::Patch), &clean),
            ReasonClass::Bugfix
        );
        assert_eq!(
            classify_reason(Some(ChangeType::Minor), &clean),
            ReasonClass::Feature
        );
        assert_eq!(classify_reason(None, &clean), ReasonClass::Maintenance);

        let fixes = CveDelta {
            resolved: vec!["CVE-2026-0001".to_string()],
            ..CveDelta::default()
        };
        assert_eq!(
            classify_reason(Some(ChangeType::Patch), &fixes),
            ReasonClass::Security
        );
    }
}
