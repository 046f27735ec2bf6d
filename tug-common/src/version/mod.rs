//! Version-scheme classification and comparison.
//!
//! Tag histories are classified structurally into SemVer-like, CalVer-like,
//! or Opaque; comparisons are only defined under a detected scheme. Malformed
//! input never errors here — anything unparseable degrades to Opaque, where
//! only digest equality remains meaningful.

mod compare;

pub use compare::{CalverStamp, is_prerelease, parse_calver, parse_semverish};

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::{ChangeType, VersionTrack};

/// Versioning scheme detected from a tag history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionScheme {
    Semver,
    Calver,
    Opaque,
}

impl std::fmt::Display for VersionScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semver => write!(f, "semver"),
            Self::Calver => write!(f, "calver"),
            Self::Opaque => write!(f, "opaque"),
        }
    }
}

/// Ordered comparison between a current and a candidate version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    /// How the candidate orders against the current version.
    pub ordering: Ordering,
    /// Highest-order component that differs; `None` when equal.
    pub change: Option<ChangeType>,
}

impl Comparison {
    /// Whether the candidate is strictly newer than the current version.
    pub fn is_newer(&self) -> bool {
        self.ordering == Ordering::Greater
    }
}

/// Classify a tag history by structure.
///
/// CalVer is checked before SemVer: a tag such as `2024.1` parses under both
/// shapes, and calendar-plausible components win. A scheme must explain at
/// least half of the parseable-looking tags to be chosen; otherwise the
/// history is Opaque (hashes, `latest`, single-component tags, digests).
pub fn classify(tags: &[String]) -> VersionScheme {
    let total = tags.iter().filter(|t| !t.trim().is_empty()).count();
    if total == 0 {
        return VersionScheme::Opaque;
    }

    let mut calver = 0usize;
    let mut semver = 0usize;
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if parse_calver(tag).is_some() {
            calver += 1;
        } else if parse_semverish(tag).is_some() {
            semver += 1;
        }
    }

    // Majority rule, calendar shapes first.
    if calver * 2 >= total && calver >= semver && calver > 0 {
        VersionScheme::Calver
    } else if semver * 2 > total {
        VersionScheme::Semver
    } else {
        VersionScheme::Opaque
    }
}

/// Resolve the scheme for a container: an operator `version_track` override
/// wins, otherwise detection runs over the observed tag history.
pub fn effective_scheme(track: Option<VersionTrack>, tags: &[String]) -> VersionScheme {
    match track {
        Some(VersionTrack::Semver) => VersionScheme::Semver,
        Some(VersionTrack::Calver) => VersionScheme::Calver,
        None => classify(tags),
    }
}

/// Compare two versions under a scheme.
///
/// Returns `None` when the scheme is Opaque or either version fails to parse
/// under the scheme — the caller falls back to digest comparison. Equal
/// versions that are formatted differently (`v1.2.0` vs `1.2.0`) compare
/// equal with `change: None`.
pub fn compare(current: &str, candidate: &str, scheme: VersionScheme) -> Option<Comparison> {
    match scheme {
        VersionScheme::Opaque => None,
        VersionScheme::Semver => {
            let a = parse_semverish(current)?;
            let b = parse_semverish(candidate)?;
            let ordering = b.cmp(&a);
            let change = if b.major != a.major {
                Some(ChangeType::Major)
            } else if b.minor != a.minor {
                Some(ChangeType::Minor)
            } else if b.patch != a.patch || b.pre != a.pre {
                Some(ChangeType::Patch)
            } else {
                None
            };
            Some(Comparison { ordering, change })
        }
        VersionScheme::Calver => {
            let a = parse_calver(current)?;
            let b = parse_calver(candidate)?;
            let ordering = b.cmp(&a);
            let change = if b.year != a.year {
                Some(ChangeType::Major)
            } else if b.month != a.month {
                Some(ChangeType::Minor)
            } else if b.patch != a.patch {
                Some(ChangeType::Patch)
            } else {
                None
            };
            Some(Comparison { ordering, change })
        }
    }
}
