//! Version ordering for package releases.
//!
//! Release versions are compared as semantic versions when both sides parse
//! (an optional leading `v` is tolerated). Anything else falls back to plain
//! string ordering, so free-form labels such as `2024-03` still sort sensibly.

use std::cmp::Ordering;

fn parse(v: &str) -> Option<semver::Version> {
    let trimmed = v.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed).ok()
}

/// Total order over version strings: semver when both parse, string
/// comparison otherwise.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Returns true if `latest` is strictly newer than `current`.
pub fn is_newer(current: &str, latest: &str) -> bool {
    compare(latest, current) == Ordering::Greater
}

/// Returns true if `current` is at least `required`.
///
/// Used to decide whether a delta built against `required` may be applied to
/// a client that is on `current`.
pub fn satisfies_minimum(current: &str, required: &str) -> bool {
    compare(current, required) != Ordering::Less
}
