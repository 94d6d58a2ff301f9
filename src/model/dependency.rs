// src/model/dependency.rs

//! Dependencies between package versions
//!
//! A dependency names a package and a half-open version interval
//! `[min, max)`. The textual form is the same one repository documents use:
//! `[1.5, 2)`.

use crate::error::{Error, Result};
use crate::version::Version;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub package: String,
    pub min: Version,
    pub max: Version,
}

impl Dependency {
    pub fn new(package: impl Into<String>, min: Version, max: Version) -> Self {
        Self {
            package: package.into(),
            min,
            max,
        }
    }

    /// Parse an interval like "[1.5, 2)"
    pub fn parse_versions(package: &str, versions: &str) -> Result<Self> {
        let s = versions.trim();
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| {
                Error::InvalidVersion(format!(
                    "Invalid version range for {}: {}",
                    package, versions
                ))
            })?;

        let (lo, hi) = inner.split_once(',').ok_or_else(|| {
            Error::InvalidVersion(format!(
                "Invalid version range for {}: {}",
                package, versions
            ))
        })?;

        Ok(Self {
            package: package.to_string(),
            min: Version::parse(lo)?,
            max: Version::parse(hi)?,
        })
    }

    /// True if `version` lies in `[min, max)`
    pub fn matches(&self, version: &Version) -> bool {
        self.min.compare(version) != std::cmp::Ordering::Greater
            && version.compare(&self.max) == std::cmp::Ordering::Less
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {})", self.package, self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_versions() {
        let d = Dependency::parse_versions("a.b.Foo", "[1.5, 2)").unwrap();
        assert_eq!(d.min, v("1.5"));
        assert_eq!(d.max, v("2"));
    }

    #[test]
    fn test_parse_versions_rejects_other_bounds() {
        assert!(Dependency::parse_versions("a.b.Foo", "(1, 2)").is_err());
        assert!(Dependency::parse_versions("a.b.Foo", "[1, 2]").is_err());
        assert!(Dependency::parse_versions("a.b.Foo", "1, 2").is_err());
        assert!(Dependency::parse_versions("a.b.Foo", "[1)").is_err());
    }

    #[test]
    fn test_half_open_interval() {
        let d = Dependency::new("a.b.Foo", v("1"), v("2"));
        assert!(d.matches(&v("1")));
        assert!(d.matches(&v("1.9.9")));
        assert!(!d.matches(&v("2")));
        assert!(!d.matches(&v("0.9")));
    }

    #[test]
    fn test_display() {
        let d = Dependency::new("a.b.Foo", v("1"), v("2"));
        assert_eq!(d.to_string(), "a.b.Foo [1, 2)");
    }
}
