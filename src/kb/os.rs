//! macOS release table.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::version::Version;

static MACOS_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^mac\s*os(?:\s*x)?\s*").expect("Invalid macOS prefix regex"));
static NAME_AND_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z ]*?)\s+(\d+(?:\.\d+){0,2})$").expect("Invalid release name regex")
});

/// Release status of an OS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Final,
    Beta,
}

/// One row of the release table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsRelease {
    pub marketing_name: &'static str,
    pub numeric_version: &'static str,
    pub kernel_major: u32,
    pub status: ReleaseStatus,
}

impl OsRelease {
    pub fn is_beta(&self) -> bool {
        self.status == ReleaseStatus::Beta
    }

    /// Upper-bound version of this release (`major.99.99`).
    pub fn version(&self) -> Version {
        Version::upper(self.kernel_major)
    }

    pub fn display_name(&self) -> String {
        match self.status {
            ReleaseStatus::Final => format!("macOS {} {}", self.marketing_name, self.numeric_version),
            ReleaseStatus::Beta => format!("macOS {} {} (Beta)", self.marketing_name, self.numeric_version),
        }
    }
}

/// Known releases, oldest first.
pub static OS_RELEASES: &[OsRelease] = &[
    OsRelease { marketing_name: "High Sierra", numeric_version: "10.13", kernel_major: 17, status: ReleaseStatus::Final },
    OsRelease { marketing_name: "Mojave", numeric_version: "10.14", kernel_major: 18, status: ReleaseStatus::Final },
    OsRelease { marketing_name: "Catalina", numeric_version: "10.15", kernel_major: 19, status: ReleaseStatus::Final },
    OsRelease { marketing_name: "Big Sur", numeric_version: "11", kernel_major: 20, status: ReleaseStatus::Final },
    OsRelease { marketing_name: "Monterey", numeric_version: "12", kernel_major: 21, status: ReleaseStatus::Final },
    OsRelease { marketing_name: "Ventura", numeric_version: "13", kernel_major: 22, status: ReleaseStatus::Final },
    OsRelease { marketing_name: "Sonoma", numeric_version: "14", kernel_major: 23, status: ReleaseStatus::Final },
    OsRelease { marketing_name: "Sequoia", numeric_version: "15", kernel_major: 24, status: ReleaseStatus::Beta },
];

pub fn release_for_major(kernel_major: u32) -> Option<&'static OsRelease> {
    OS_RELEASES.iter().find(|r| r.kernel_major == kernel_major)
}

pub fn is_beta_major(kernel_major: u32) -> bool {
    release_for_major(kernel_major).map(|r| r.is_beta()).unwrap_or(false)
}

/// Human name for a kernel version, e.g. `macOS Sonoma 14`.
pub fn os_name(version: Version) -> String {
    release_for_major(version.major)
        .map(|r| r.display_name())
        .unwrap_or_else(|| format!("Darwin {}", version.major))
}

/// Resolve user input (`"14"`, `"10.15"`, `"23"`, `"Sonoma"`) to a kernel upper bound.
///
/// A leading `macOS` / `Mac OS X` is ignored, and `"Sonoma 14"` resolves
/// through its name.
pub fn parse_target(input: &str) -> Option<Version> {
    let stripped = MACOS_PREFIX.replace(input.trim(), "");
    let mut trimmed = stripped.trim();
    if let Some(caps) = NAME_AND_NUMBER.captures(trimmed) {
        trimmed = caps.get(1).map(|m| m.as_str()).unwrap_or(trimmed);
    }
    if let Some(release) = OS_RELEASES
        .iter()
        .find(|r| r.marketing_name.eq_ignore_ascii_case(trimmed))
    {
        return Some(release.version());
    }
    // Bare darwin majors are accepted when they name a known release
    if let Ok(major) = trimmed.parse::<u32>() {
        if release_for_major(major).is_some() && !(11..=15).contains(&major) {
            return Some(Version::upper(major));
        }
    }
    Version::from_marketing(trimmed)
        .filter(|v| release_for_major(v.major).is_some())
        .map(|v| v.as_upper())
}

/// Releases the user may target given the beta setting.
pub fn selectable_releases(include_beta: bool) -> impl Iterator<Item = &'static OsRelease> {
    OS_RELEASES.iter().filter(move |r| include_beta || !r.is_beta())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_table_is_sorted_and_contiguous() {
        for pair in OS_RELEASES.windows(2) {
            assert_eq!(pair[0].kernel_major + 1, pair[1].kernel_major);
        }
    }

    #[test]
    fn test_numeric_versions_match_kernel_majors() {
        for release in OS_RELEASES {
            let v = Version::from_marketing(release.numeric_version).unwrap();
            assert_eq!(v.major, release.kernel_major, "{}", release.marketing_name);
        }
    }

    #[test]
    fn test_parse_target_forms() {
        assert_eq!(parse_target("Sonoma"), Some(Version::upper(23)));
        assert_eq!(parse_target("14"), Some(Version::upper(23)));
        assert_eq!(parse_target("10.15"), Some(Version::upper(19)));
        assert_eq!(parse_target("23"), Some(Version::upper(23)));
        assert_eq!(parse_target("15"), Some(Version::upper(24)));
        assert_eq!(parse_target("26"), None);
        assert_eq!(parse_target("Leopard"), None);
        assert_eq!(parse_target("macOS Sonoma 14"), Some(Version::upper(23)));
        assert_eq!(parse_target("Mac OS X 10.13"), Some(Version::upper(17)));
        assert_eq!(parse_target("macos 12"), Some(Version::upper(21)));
    }

    #[test]
    fn test_beta_filtering() {
        assert!(is_beta_major(24));
        assert!(!is_beta_major(23));
        assert!(!selectable_releases(false).any(|r| r.is_beta()));
        assert_eq!(selectable_releases(true).count(), OS_RELEASES.len());
    }
}
