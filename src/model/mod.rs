// src/model/mod.rs

//! Core entities: packages, package versions, licenses and install records

mod dependency;
mod operation;

pub use dependency::Dependency;
pub use operation::{simplify, InstallOperation, OperationKind};

use crate::error::{Error, Result};
use crate::version::Version;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Installation status of a package, as stored in the catalogue
///
/// The order matters: a status filter for `Installed` also matches
/// `Updateable` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PackageStatus {
    NotInstalled,
    Installed,
    Updateable,
}

impl PackageStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            PackageStatus::NotInstalled => 0,
            PackageStatus::Installed => 1,
            PackageStatus::Updateable => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => PackageStatus::Installed,
            2 => PackageStatus::Updateable,
            _ => PackageStatus::NotInstalled,
        }
    }
}

/// A catalogue entry for a piece of software
///
/// Identified by a fully qualified reverse-DNS name like
/// "org.gimp.GIMP". A package may have many versions.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub title: String,
    pub url: String,
    pub icon: String,
    pub description: String,
    pub license: String,
    /// Category path with up to 5 levels, levels separated by "|"
    pub categories: Vec<String>,
    pub status: PackageStatus,
}

impl Package {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            url: String::new(),
            icon: String::new(),
            description: String::new(),
            license: String::new(),
            categories: Vec::new(),
            status: PackageStatus::NotInstalled,
        }
    }

    /// Check whether a string is a valid fully qualified package name
    ///
    /// Dot-separated segments of letters, digits, "-" and "_"; at least one
    /// segment; no empty segments.
    pub fn is_valid_name(name: &str) -> bool {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").unwrap()
        });
        re.is_match(name)
    }

    /// The trailing dot-segment of the full name ("GIMP" for
    /// "org.gimp.GIMP")
    pub fn short_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(pos) => &self.name[pos + 1..],
            None => &self.name,
        }
    }
}

/// A software license
#[derive(Debug, Clone)]
pub struct License {
    pub name: String,
    pub title: String,
    pub description: String,
    pub url: String,
}

impl License {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: String::new(),
            url: String::new(),
        }
    }
}

/// A file used to recognise an installation by content
///
/// `path` is relative to the installation directory; `sha1` is the expected
/// digest of the file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectFile {
    pub path: String,
    pub sha1: String,
}

/// A specific release of a package
///
/// The catalogue stores the original `<version>` XML element verbatim and
/// parses it back on demand; `source_xml` carries that text when the value
/// came from a repository document or from the database.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub package: String,
    pub version: Version,
    /// Download URL; versions without one cannot be installed
    pub download: Option<String>,
    /// Expected SHA-1 of the downloaded file
    pub sha1: Option<String>,
    /// Windows Installer product code, including braces (38 characters)
    pub msi_guid: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub detect_files: Vec<DetectFile>,
    pub important: bool,
    pub source_xml: Option<String>,
}

impl PackageVersion {
    pub fn new(package: impl Into<String>, version: Version) -> Self {
        Self {
            package: package.into(),
            version,
            download: None,
            sha1: None,
            msi_guid: None,
            dependencies: Vec::new(),
            detect_files: Vec::new(),
            important: false,
            source_xml: None,
        }
    }

    /// True if this version can be downloaded and installed
    pub fn installable(&self) -> bool {
        self.download.is_some()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package, self.version)
    }
}

/// Record that a particular package version is present on the machine
#[derive(Debug, Clone)]
pub struct InstalledPackageVersion {
    pub package: String,
    pub version: Version,
    /// Installation directory; `None` means "detected, but nowhere in
    /// particular" (OS components, MSI products without a location)
    pub directory: Option<PathBuf>,
    /// True if the installation was discovered rather than performed by
    /// this tool
    pub external: bool,
    /// "prefix:value" written by the third-party detector that owns this
    /// record; the prefix identifies the detector
    pub detection_info: Option<String>,
    /// Set by the refresh pipeline when a stored dependency of this version
    /// cannot be satisfied from the installed set
    pub dependency_missing: bool,
}

impl InstalledPackageVersion {
    pub fn new(package: impl Into<String>, version: Version) -> Self {
        Self {
            package: package.into(),
            version,
            directory: None,
            external: true,
            detection_info: None,
            dependency_missing: false,
        }
    }

    pub fn with_directory(
        package: impl Into<String>,
        version: Version,
        directory: PathBuf,
        external: bool,
    ) -> Self {
        Self {
            package: package.into(),
            version,
            directory: Some(directory),
            external,
            detection_info: None,
            dependency_missing: false,
        }
    }

    /// Map key: "name-version" with the normalized version string. The same
    /// form is used for the registry sub-key of this record.
    pub fn key(&self) -> String {
        format!("{}-{}", self.package, self.version.normalize())
    }

    /// Split a registry sub-key name on the last "-" into package name and
    /// version. Returns `None` for names that do not parse.
    pub fn parse_key(key: &str) -> Option<(String, Version)> {
        let pos = key.rfind('-')?;
        if pos == 0 {
            return None;
        }
        let package = &key[..pos];
        if !Package::is_valid_name(package) {
            return None;
        }
        let version = Version::parse(&key[pos + 1..]).ok()?;
        Some((package.to_string(), version))
    }
}

/// Validate an icon URL: must be an absolute http or https URL
pub fn validate_icon_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "Invalid icon URL (must be absolute http/https): {}",
            url
        )))
    }
}
