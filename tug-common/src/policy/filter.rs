//! Scope and ignore filtering over registry tag candidates.
//!
//! Ignore rules are asymmetric on purpose: an exact ignore expresses "not
//! this build" and clears as soon as the top candidate moves on, while a
//! prefix ignore expresses "not this minor line" and survives new patches
//! under the same prefix.

use serde::{Deserialize, Serialize};

use crate::types::{ChangeType, UpdateScope};
use crate::version::{self, CalverStamp, VersionScheme};

/// An operator-configured ignore rule for one dependency target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IgnoreRule {
    /// Ignore exactly this version.
    Exact(String),
    /// Ignore every version under this `major.minor` prefix.
    Prefix(String),
}

impl IgnoreRule {
    /// Whether a candidate version is covered by this rule.
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = normalize(candidate);
        match self {
            Self::Exact(version) => candidate == normalize(version),
            Self::Prefix(prefix) => {
                let prefix = normalize(prefix);
                candidate == prefix
                    || candidate
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('-'))
            }
        }
    }

    /// Whether the rule should be cleared given the latest top candidate.
    ///
    /// Exact rules clear once the candidate differs from the ignored version;
    /// prefix rules clear only when the prefix itself has moved on.
    pub fn is_stale(&self, top_candidate: &str) -> bool {
        match self {
            Self::Exact(version) => normalize(top_candidate) != normalize(version),
            Self::Prefix(_) => !self.matches(top_candidate),
        }
    }
}

impl std::fmt::Display for IgnoreRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "exact:{v}"),
            Self::Prefix(p) => write!(f, "prefix:{p}"),
        }
    }
}

fn normalize(tag: &str) -> String {
    let tag = tag.trim();
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
        .to_string()
}

/// One ranked candidate and the change magnitude it represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOutcome {
    pub candidate: String,
    pub change: Option<ChangeType>,
}

/// Result of filtering a tag history against scope and ignore state.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Highest candidate that is newer, in scope, and not ignored.
    pub proposed: Option<CandidateOutcome>,
    /// Highest newer candidate rejected by scope, kept for surfacing.
    pub blocked_by_scope: Option<CandidateOutcome>,
    /// Highest tag that is CalVer-shaped while the current version is not.
    pub calver_blocked: Option<String>,
    /// Candidates skipped by the ignore rule, highest first.
    pub ignored: Vec<String>,
}

/// Filter newer candidates by prerelease inclusion, ignore rule, and scope.
///
/// When both in-scope and out-of-scope candidates exist, the highest in-scope
/// candidate is proposed and the highest out-of-scope candidate is retained
/// as informational only — it never becomes an actionable update.
pub fn select_candidate(
    current: &str,
    tags: &[String],
    scheme: VersionScheme,
    scope: UpdateScope,
    ignore: Option<&IgnoreRule>,
    include_prereleases: bool,
) -> Selection {
    let mut selection = Selection {
        calver_blocked: best_foreign_calver(current, tags, scheme),
        ..Selection::default()
    };
    if scheme == VersionScheme::Opaque {
        return selection;
    }

    let mut newer: Vec<CandidateOutcome> = tags
        .iter()
        .filter(|tag| include_prereleases || !version::is_prerelease(tag))
        .filter_map(|tag| {
            let cmp = version::compare(current, tag, scheme)?;
            cmp.is_newer().then(|| CandidateOutcome {
                candidate: tag.clone(),
                change: cmp.change,
            })
        })
        .collect();
    sort_descending(&mut newer, scheme);

    for outcome in newer {
        if let Some(rule) = ignore
            && rule.matches(&outcome.candidate)
        {
            selection.ignored.push(outcome.candidate);
            continue;
        }
        let in_scope = outcome.change.is_none_or(|change| scope.allows(change));
        if in_scope {
            if selection.proposed.is_none() {
                selection.proposed = Some(outcome);
            }
        } else if selection.blocked_by_scope.is_none() {
            selection.blocked_by_scope = Some(outcome);
        }
        if selection.proposed.is_some() && selection.blocked_by_scope.is_some() {
            break;
        }
    }
    selection
}

fn sort_descending(candidates: &mut [CandidateOutcome], scheme: VersionScheme) {
    match scheme {
        VersionScheme::Semver => {
            candidates.sort_by(|a, b| {
                let ka = version::parse_semverish(&a.candidate);
                let kb = version::parse_semverish(&b.candidate);
                kb.cmp(&ka)
            });
        }
        VersionScheme::Calver => {
            candidates.sort_by(|a, b| {
                let ka = version::parse_calver(&a.candidate);
                let kb = version::parse_calver(&b.candidate);
                kb.cmp(&ka)
            });
        }
        VersionScheme::Opaque => {}
    }
}

/// Highest CalVer-shaped tag when the current version itself is not CalVer.
/// Purely informational; surfaced as `calver_blocked_tag` on the container.
fn best_foreign_calver(current: &str, tags: &[String], scheme: VersionScheme) -> Option<String> {
    if scheme == VersionScheme::Calver || version::parse_calver(current).is_some() {
        return None;
    }
    tags.iter()
        .filter_map(|tag| version::parse_calver(tag).map(|stamp| (stamp, tag)))
        .max_by_key(|(stamp, _)| *stamp)
        .map(|(_, tag)| tag.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_ignore_blocks_only_that_version() {
        let rule = IgnoreRule::Exact("3.15.1".to_string());
        assert!(rule.matches("3.15.1"));
        assert!(rule.matches("v3.15.1"));
        assert!(!rule.matches("3.15.2"));
    }

    #[test]
    fn prefix_ignore_blocks_the_whole_minor_line() {
        let rule = IgnoreRule::Prefix("3.15".to_string());
        assert!(rule.matches("3.15.1"));
        assert!(rule.matches("3.15.9"));
        assert!(rule.matches("3.15"));
        assert!(!rule.matches("3.16.0"));
        assert!(!rule.matches("3.150.0"));
    }

    #[test]
    fn exact_ignore_goes_stale_when_candidate_moves_on() {
        let rule = IgnoreRule::Exact("3.15.1".to_string());
        assert!(!rule.is_stale("3.15.1"));
        assert!(rule.is_stale("3.15.2"));
    }

    #[test]
    fn prefix_ignore_survives_new_patches_under_the_prefix() {
        let rule = IgnoreRule::Prefix("3.15".to_string());
        assert!(!rule.is_stale("3.15.2"));
        assert!(!rule.is_stale("3.15.9"));
        assert!(rule.is_stale("3.16.0"));
    }

    #[test]
    fn scope_blocks_majors_and_retains_the_best_blocked() {
        let selection = select_candidate(
            "1.2.0",
            &tags(&["1.3.0", "2.0.0", "1.2.5"]),
            VersionScheme::Semver,
            UpdateScope::Minor,
            None,
            false,
        );
        assert_eq!(selection.proposed.as_ref().unwrap().candidate, "1.3.0");
        assert_eq!(
            selection.blocked_by_scope.as_ref().unwrap().candidate,
            "2.0.0"
        );
    }

    #[test]
    fn scope_major_allows_everything() {
        let selection = select_candidate(
            "1.2.0",
            &tags(&["1.3.0", "2.0.0"]),
            VersionScheme::Semver,
            UpdateScope::Major,
            None,
            false,
        );
        assert_eq!(selection.proposed.as_ref().unwrap().candidate, "2.0.0");
        assert!(selection.blocked_by_scope.is_none());
    }

    #[test]
    fn ignored_candidate_falls_through_to_the_next_in_scope() {
        let rule = IgnoreRule::Exact("1.3.0".to_string());
        let selection = select_candidate(
            "1.2.0",
            &tags(&["1.3.0", "1.2.9"]),
            VersionScheme::Semver,
            UpdateScope::Minor,
            Some(&rule),
            false,
        );
        assert_eq!(selection.ignored, vec!["1.3.0".to_string()]);
        assert_eq!(selection.proposed.as_ref().unwrap().candidate, "1.2.9");
    }

    #[test]
    fn prereleases_are_skipped_unless_included() {
        let history = tags(&["1.3.0-rc.1", "1.2.5"]);
        let without = select_candidate(
            "1.2.0",
            &history,
            VersionScheme::Semver,
            UpdateScope::Minor,
            None,
            false,
        );
        assert_eq!(without.proposed.as_ref().unwrap().candidate, "1.2.5");

        let with = select_candidate(
            "1.2.0",
            &history,
            VersionScheme::Semver,
            UpdateScope::Minor,
            None,
            true,
        );
        assert_eq!(with.proposed.as_ref().unwrap().candidate, "1.3.0-rc.1");
    }

    #[test]
    fn opaque_scheme_selects_nothing() {
        let selection = select_candidate(
            "latest",
            &tags(&["edge", "stable"]),
            VersionScheme::Opaque,
            UpdateScope::Major,
            None,
            false,
        );
        assert!(selection.proposed.is_none());
        assert!(selection.blocked_by_scope.is_none());
    }

    #[test]
    fn foreign_calver_tags_are_surfaced_not_proposed() {
        let selection = select_candidate(
            "1.2.0",
            &tags(&["1.3.0", "2024.01", "2024.02"]),
            VersionScheme::Semver,
            UpdateScope::Minor,
            None,
            false,
        );
        assert_eq!(selection.proposed.as_ref().unwrap().candidate, "1.3.0");
        assert_eq!(selection.calver_blocked.as_deref(), Some("2024.02"));
    }

    #[test]
    fn older_and_equal_tags_never_propose() {
        let selection = select_candidate(
            "1.3.0",
            &tags(&["1.2.0", "1.3.0", "v1.3.0"]),
            VersionScheme::Semver,
            UpdateScope::Major,
            None,
            false,
        );
        assert!(selection.proposed.is_none());
    }
}
