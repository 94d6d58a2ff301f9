// src/version/mod.rs

//! Version parsing and comparison for package versions
//!
//! A version is an ordered tuple of non-negative integers. Comparison pads
//! the shorter tuple with zeros, so "1.2" == "1.2.0". Underscores are
//! accepted as separators because several registry keys (Java) write
//! versions like "1.7.0_45".

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version
///
/// Examples:
/// - "1.2.3" → (1, 2, 3)
/// - "1_0_2" → (1, 0, 2)
/// - "1..0", "", "1.a" → error
///
/// Equality follows comparison: "1.2" and "1.2.0" are equal.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    /// Create a version from its parts. Empty input becomes (0).
    pub fn from_parts(parts: &[u32]) -> Self {
        if parts.is_empty() {
            Self { parts: vec![0] }
        } else {
            Self {
                parts: parts.to_vec(),
            }
        }
    }

    /// Parse a version string
    ///
    /// Accepts dot-separated decimal segments; underscores are treated as
    /// dots. Empty segments and non-digit characters are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('_', ".");
        if normalized.is_empty() {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let mut parts = Vec::new();
        for segment in normalized.split('.') {
            if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::InvalidVersion(s.to_string()));
            }
            let n = segment
                .parse::<u32>()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;
            parts.push(n);
        }

        Ok(Self { parts })
    }

    /// Number of segments in the untrimmed tuple
    pub fn n_parts(&self) -> usize {
        self.parts.len()
    }

    /// Drop trailing zeros. (1, 2, 0, 0) becomes (1, 2); (0) stays (0).
    pub fn normalize(&self) -> Self {
        let mut parts = self.parts.clone();
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }
        Self { parts }
    }

    /// Insert a segment at the front. Used by the msxml3.dll detector.
    pub fn prepend(&mut self, part: u32) {
        self.parts.insert(0, part);
    }

    /// Compare two versions, padding the shorter tuple with zeros
    pub fn compare(&self, other: &Version) -> Ordering {
        let n = self.parts.len().max(other.parts.len());
        for i in 0..n {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for p in &self.parts {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", p)?;
            first = false;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalize().parts.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
