//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Version labels, build metadata and revision references."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

/// Compile-time version metadata captured via `vergen`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Crate version of the running binary.
    pub semver: String,
    /// Git commit hash captured at build time.
    pub git_sha: String,
    /// Build timestamp from the compilation environment.
    pub build_timestamp: String,
    /// Target triple used for the build.
    pub target: String,
    /// Cargo profile used during compilation.
    pub profile: String,
}

impl VersionInfo {
    /// Construct a new [`VersionInfo`] instance using environment metadata.
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("VERGEN_GIT_SHA")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            profile: option_env!("VERGEN_CARGO_PROFILE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
        }
    }

    /// Extended string containing build metadata suitable for `--version` flags.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "relay-admin v{semver} (git {sha})\nBuilt: {built}\nTarget: {target}\nProfile: {profile}",
            semver = self.semver,
            sha = self.git_sha,
            built = self.build_timestamp,
            target = self.target,
            profile = self.profile
        )
    }
}

/// Numeric `major.minor.patch` triple parsed leniently from a version label.
///
/// Missing or non-numeric components count as zero, a leading `v` is ignored
/// and pre-release/build suffixes on a component are dropped, so `v1.2`
/// becomes `1.2.0` and `1.4.0-beta.1` becomes `1.4.0`. Ordering is
/// lexicographic on the numeric triple, never on the label text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct VersionTriple {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl VersionTriple {
    /// Build a triple from explicit components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version label. Never fails.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let trimmed = label.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let mut parts = trimmed.split('.').map(leading_number);
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Compare two version labels numerically.
///
/// Returns [`Ordering::Less`] when `current` is older than `latest`.
#[must_use]
pub fn compare_versions(current: &str, latest: &str) -> Ordering {
    VersionTriple::parse(current).cmp(&VersionTriple::parse(latest))
}

fn leading_number(component: &str) -> u64 {
    let digits: String = component
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_contains_semver() {
        let info = VersionInfo::current();
        let extended = info.extended();
        assert!(extended.contains(&info.semver));
    }

    #[test]
    fn comparison_is_numeric_not_textual() {
        assert_eq!(compare_versions("1.2.0", "1.10.0"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.0", "10.0.0"), Ordering::Less);
    }

    #[test]
    fn missing_components_default_to_zero() {
        assert_eq!(VersionTriple::parse("1"), VersionTriple::new(1, 0, 0));
        assert_eq!(VersionTriple::parse("1.4"), VersionTriple::new(1, 4, 0));
        assert_eq!(VersionTriple::parse(""), VersionTriple::default());
        assert_eq!(compare_versions("1.4", "1.4.0"), Ordering::Equal);
    }

    #[test]
    fn prefixes_and_suffixes_are_tolerated() {
        assert_eq!(VersionTriple::parse("v2.3.4"), VersionTriple::new(2, 3, 4));
        assert_eq!(
            VersionTriple::parse(" 1.4.0-beta.1 \n"),
            VersionTriple::new(1, 4, 0)
        );
        assert_eq!(VersionTriple::parse("x.y.z"), VersionTriple::default());
        assert_eq!(VersionTriple::parse("1.2.3.4").to_string(), "1.2.3");
    }

    #[test]
    fn ordering_is_antisymmetric_and_lexicographic() {
        let labels = [
            "0.0.1", "0.1.0", "0.10.0", "1.0.0", "1.0.10", "1.2.0", "1.10.0", "2", "2.0.1",
        ];
        for a in labels {
            for b in labels {
                let forward = compare_versions(a, b);
                let backward = compare_versions(b, a);
                assert_eq!(forward, backward.reverse(), "{a} vs {b}");

                let (ta, tb) = (VersionTriple::parse(a), VersionTriple::parse(b));
                let expected = ta
                    .major
                    .cmp(&tb.major)
                    .then(ta.minor.cmp(&tb.minor))
                    .then(ta.patch.cmp(&tb.patch));
                assert_eq!(forward, expected, "{a} vs {b}");
            }
        }
    }
}
