//! Darwin version arithmetic and OS support ranges.
//!
//! Versions are compared as `(kernel_major, minor, patch)` triples. Marketing
//! versions are converted to kernel majors with two schemes:
//! - legacy `10.x` releases: `x + 4`
//! - unified majors (11 and later): `Y + 9`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowest kernel major the knowledge base knows about (High Sierra).
pub const LOWEST_KERNEL_MAJOR: u32 = 17;

/// Highest kernel major the knowledge base knows about (Sequoia).
pub const HIGHEST_KERNEL_MAJOR: u32 = 24;

/// First marketing major outside the `10.x` line.
const FIRST_UNIFIED_MAJOR: u32 = 11;

/// A Darwin kernel version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version { major, minor, patch }
    }

    /// `(major, 0, 0)`: the lower bound of a major.
    pub const fn lower(major: u32) -> Self {
        Version::new(major, 0, 0)
    }

    /// `(major, 99, 99)`: the upper bound of a major.
    pub const fn upper(major: u32) -> Self {
        Version::new(major, 99, 99)
    }

    pub const fn lowest() -> Self {
        Version::lower(LOWEST_KERNEL_MAJOR)
    }

    pub const fn highest() -> Self {
        Version::upper(HIGHEST_KERNEL_MAJOR)
    }

    /// Kernel major for a marketing major/minor pair (`10.15` or `14`).
    pub fn kernel_major_for(marketing_major: u32, marketing_minor: u32) -> Option<u32> {
        match marketing_major {
            10 if marketing_minor >= 4 => Some(marketing_minor + 4),
            m if m >= FIRST_UNIFIED_MAJOR => m.checked_add(9),
            _ => None,
        }
    }

    /// Parse a marketing version (`10.15.7`, `14`, `15.1`) into a kernel triple.
    pub fn from_marketing(s: &str) -> Option<Version> {
        let parts: Vec<u32> = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [10, minor] => Some(Version::lower(Self::kernel_major_for(10, *minor)?)),
            [10, minor, patch] => Some(Version::new(Self::kernel_major_for(10, *minor)?, *patch, 0)),
            [major] => Some(Version::lower(Self::kernel_major_for(*major, 0)?)),
            [major, minor] => Some(Version::new(Self::kernel_major_for(*major, 0)?, *minor, 0)),
            [major, minor, patch] => Some(Version::new(Self::kernel_major_for(*major, 0)?, *minor, *patch)),
            _ => None,
        }
    }

    /// Marketing major string for this kernel major (`10.15`, `14`).
    pub fn marketing(&self) -> String {
        match self.major {
            m if m < FIRST_UNIFIED_MAJOR + 9 => format!("10.{}", m.saturating_sub(4)),
            m => format!("{}", m - 9),
        }
    }

    /// The same version one major lower, keeping minor/patch.
    pub fn step_down_major(&self) -> Version {
        Version::new(self.major.saturating_sub(1), self.minor, self.patch)
    }

    /// Widen a bare major to its upper bound.
    pub fn as_upper(&self) -> Version {
        Version::upper(self.major)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    /// Parse a kernel version triple; missing components default to 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> Result<u32, String> {
            match parts.next() {
                None | Some("") => Ok(0),
                Some(p) => p
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid {} component in version '{}'", name, s)),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if major == 0 {
            return Err(format!("Invalid kernel version: {}", s));
        }
        Ok(Version::new(major, minor, patch))
    }
}

/// An inclusive `[lo, hi]` range of kernel versions. `lo <= hi` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportRange {
    lo: Version,
    hi: Version,
}

impl SupportRange {
    /// Build a range; returns None when `lo > hi`.
    pub fn new(lo: Version, hi: Version) -> Option<Self> {
        (lo <= hi).then_some(SupportRange { lo, hi })
    }

    /// Range over whole majors: `[lo.0.0, hi.99.99]`.
    pub fn majors(lo: u32, hi: u32) -> Option<Self> {
        Self::new(Version::lower(lo), Version::upper(hi))
    }

    /// The universal sentinel `[lowest, highest]`.
    pub const fn universal() -> Self {
        SupportRange {
            lo: Version::lowest(),
            hi: Version::highest(),
        }
    }

    pub fn lo(&self) -> Version {
        self.lo
    }

    pub fn hi(&self) -> Version {
        self.hi
    }

    pub fn contains(&self, v: Version) -> bool {
        self.lo <= v && v <= self.hi
    }

    /// Whether the range covers every point release of `major`.
    pub fn covers_major(&self, major: u32) -> bool {
        self.lo <= Version::lower(major) && Version::upper(major) <= self.hi
    }

    /// Whether a target major is covered at any point release.
    pub fn admits_major(&self, major: u32) -> bool {
        self.lo.major <= major && major <= self.hi.major
    }

    pub fn intersect(&self, other: &SupportRange) -> Option<SupportRange> {
        SupportRange::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }

    /// Lower the upper bound, keeping the range valid.
    pub fn cap(&self, hi: Version) -> Option<SupportRange> {
        SupportRange::new(self.lo, self.hi.min(hi))
    }
}

impl fmt::Display for SupportRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.lo, self.hi)
    }
}

/// Intersect an iterator of ranges; `None` when empty or disjoint.
pub fn intersect_all<'a, I>(ranges: I) -> Option<SupportRange>
where
    I: IntoIterator<Item = &'a SupportRange>,
{
    let mut iter = ranges.into_iter();
    let first = *iter.next()?;
    iter.try_fold(first, |acc, r| acc.intersect(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_kernel_major_schemes() {
        assert_eq!(Version::kernel_major_for(10, 13), Some(17));
        assert_eq!(Version::kernel_major_for(10, 15), Some(19));
        assert_eq!(Version::kernel_major_for(11, 0), Some(20));
        assert_eq!(Version::kernel_major_for(14, 0), Some(23));
        assert_eq!(Version::kernel_major_for(15, 0), Some(24));
        assert_eq!(Version::kernel_major_for(16, 0), Some(25));
        assert_eq!(Version::kernel_major_for(9, 0), None);
    }

    #[test]
    fn test_from_marketing() {
        assert_eq!(Version::from_marketing("10.15.7"), Some(Version::new(19, 7, 0)));
        assert_eq!(Version::from_marketing("14"), Some(Version::lower(23)));
        assert_eq!(Version::from_marketing("garbage"), None);
    }

    #[test]
    fn test_marketing_round_trip_names() {
        assert_eq!(Version::lower(19).marketing(), "10.15");
        assert_eq!(Version::lower(23).marketing(), "14");
        assert_eq!(Version::lower(24).marketing(), "15");
    }

    #[test]
    fn test_parse_defaults_missing_components() {
        let v: Version = "23".parse().unwrap();
        assert_eq!(v, Version::new(23, 0, 0));
        assert!("x.1".parse::<Version>().is_err());
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        assert!(SupportRange::new(Version::lower(22), Version::upper(20)).is_none());
        let r = SupportRange::majors(20, 23).unwrap();
        assert!(r.contains(Version::new(23, 4, 0)));
        assert!(!r.contains(Version::lower(24)));
    }

    #[test]
    fn test_intersect_all_empty_is_none() {
        let ranges: Vec<SupportRange> = vec![];
        assert!(intersect_all(&ranges).is_none());
        let a = SupportRange::majors(17, 21).unwrap();
        let b = SupportRange::majors(22, 24).unwrap();
        assert!(intersect_all(&[a, b]).is_none());
    }

    proptest! {
        #[test]
        fn prop_legacy_scheme(x in 4u32..=15) {
            prop_assert_eq!(Version::kernel_major_for(10, x), Some(x + 4));
        }

        #[test]
        fn prop_unified_scheme(y in 11u32..=200, minor in 0u32..10) {
            prop_assert_eq!(Version::kernel_major_for(y, minor), Some(y + 9));
            let parsed = Version::from_marketing(&y.to_string()).unwrap();
            prop_assert_eq!(parsed.major, y + 9);
            prop_assert_eq!(parsed.marketing(), y.to_string());
        }

        #[test]
        fn prop_ordering_is_total(a in (1u32..40, 0u32..100, 0u32..100), b in (1u32..40, 0u32..100, 0u32..100)) {
            let va = Version::new(a.0, a.1, a.2);
            let vb = Version::new(b.0, b.1, b.2);
            let lt = va < vb;
            let gt = va > vb;
            let eq = va == vb;
            prop_assert_eq!([lt, gt, eq].iter().filter(|x| **x).count(), 1);
        }

        #[test]
        fn prop_intersection_is_contained(lo1 in 17u32..26, len1 in 0u32..6, lo2 in 17u32..26, len2 in 0u32..6) {
            let a = SupportRange::majors(lo1, lo1 + len1).unwrap();
            let b = SupportRange::majors(lo2, lo2 + len2).unwrap();
            if let Some(i) = a.intersect(&b) {
                prop_assert!(a.lo() <= i.lo() && i.hi() <= a.hi());
                prop_assert!(b.lo() <= i.lo() && i.hi() <= b.hi());
            } else {
                prop_assert!(a.hi() < b.lo() || b.hi() < a.lo());
            }
        }
    }
}
