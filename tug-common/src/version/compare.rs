//! Lenient version parsing underneath scheme classification.

use std::sync::OnceLock;

use regex::Regex;
use semver::Version;

/// Years outside this range are treated as ordinary numbers, not calendars.
const CALVER_YEAR_MIN: u32 = 2000;
const CALVER_YEAR_MAX: u32 = 2099;

fn semverish_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+\.\d+(\.\d+)?(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$")
            .expect("semver shape regex")
    })
}

fn calver_dotted_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})\.(\d{1,2})(?:\.(\d{1,4}))?$").expect("calver regex"))
}

fn calver_compact_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").expect("calver compact regex"))
}

/// Calendar version components in comparison order.
///
/// For `YYYY.MM[.patch]` tags the patch is the explicit third component; for
/// `YYYYMMDD` tags the day of month takes the patch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CalverStamp {
    pub year: u32,
    pub month: u32,
    pub patch: u32,
}

/// Parse a SemVer-like tag, tolerating a `v` prefix and two-component tags.
///
/// Two-component tags (`1.2`) are padded to `1.2.0` before parsing so they
/// order correctly against fully-specified tags. Anything the `semver` crate
/// rejects after that (leading zeros included) is not SemVer-like.
pub fn parse_semverish(tag: &str) -> Option<Version> {
    let tag = tag.trim();
    let bare = tag
        .strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag);
    if !semverish_shape().is_match(bare) {
        return None;
    }
    if let Ok(version) = Version::parse(bare) {
        return Some(version);
    }
    let padded = pad_two_component(bare)?;
    Version::parse(&padded).ok()
}

/// Parse a CalVer-like tag (`YYYY.MM[.patch]` or `YYYYMMDD`).
///
/// Components must be calendar-plausible: a year in 2000-2099 and a month in
/// 1-12. Everything else is rejected so ordinary large version numbers do not
/// masquerade as calendars.
pub fn parse_calver(tag: &str) -> Option<CalverStamp> {
    let tag = tag.trim();
    if let Some(caps) = calver_dotted_shape().captures(tag) {
        let year: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let patch: u32 = caps
            .get(3)
            .map(|m| m.as_str().parse())
            .transpose()
            .ok()?
            .unwrap_or(0);
        if (CALVER_YEAR_MIN..=CALVER_YEAR_MAX).contains(&year) && (1..=12).contains(&month) {
            return Some(CalverStamp { year, month, patch });
        }
        return None;
    }
    if let Some(caps) = calver_compact_shape().captures(tag) {
        let year: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        if (CALVER_YEAR_MIN..=CALVER_YEAR_MAX).contains(&year)
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
        {
            return Some(CalverStamp {
                year,
                month,
                patch: day,
            });
        }
    }
    None
}

/// Whether a tag carries a pre-release marker (`1.2.3-rc.1`).
pub fn is_prerelease(tag: &str) -> bool {
    parse_semverish(tag).is_some_and(|v| !v.pre.is_empty())
}

fn pad_two_component(bare: &str) -> Option<String> {
    let suffix_at = bare.find(['-', '+']);
    let (core, suffix) = match suffix_at {
        Some(idx) => bare.split_at(idx),
        None => (bare, ""),
    };
    if core.split('.').count() == 2 {
        Some(format!("{core}.0{suffix}"))
    } else {
        None
    }
}
