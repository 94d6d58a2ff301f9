// src/detection/third_party.rs

//! Importing installations from third-party package managers
//!
//! A third-party package manager plugin reports what it finds as a list of
//! installation records plus a detection-info prefix. The prefix owns its
//! record set: anything carrying it that is not re-emitted in the current
//! pass is considered uninstalled and removed.

use crate::db::Catalog;
use crate::error::Result;
use crate::installed::InstalledPackages;
use crate::model::InstalledPackageVersion;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// One installation reported by a third-party package manager
pub struct DetectedInstallation {
    pub record: InstalledPackageVersion,
    /// Removal script contents, if the package manager can produce one
    pub uninstall_script: Option<String>,
}

/// Result of one third-party detection pass
pub struct ThirdPartyDetection {
    /// Prefix for the detection-info values of all returned records, like
    /// "control-panel:". Empty if the plugin does not track ownership.
    pub prefix: String,
    pub found: Vec<DetectedInstallation>,
}

/// A third-party package manager whose installations are imported
pub trait ThirdPartyPM: Send + Sync {
    /// Scan the machine and report everything this package manager
    /// installed
    fn detect(&self) -> Result<ThirdPartyDetection>;
}

/// Default removal script for installations nothing knows how to remove
const STUB_UNINSTALL: &str =
    "@echo off\r\necho This package cannot be uninstalled automatically >&2\r\nexit /b 1\r\n";

/// Reconcile one detection pass into the installed set
///
/// Five cases per record, depending on whether it has a directory and
/// whether a removal script is available:
/// 1. no directory, no script: a directory under `NpackdDetected` is
///    created holding a stub `Uninstall.bat` that fails
/// 2. no directory, script: same synthesised directory, with the script
/// 3. the directory belongs to another installed package: ignored
/// 4. directory, no script: removal will just delete the directory
/// 5. directory and script: the script is stored unless one exists
///
/// A non-existing directory is handled as missing.
pub fn apply(
    catalog: &Catalog,
    installed: &InstalledPackages,
    detected_dir: &Path,
    detection: ThirdPartyDetection,
) -> Result<()> {
    let mut emitted = HashSet::new();

    for found in detection.found {
        let mut record = found.record;

        if !detection.prefix.is_empty() && record.detection_info.is_none() {
            record.detection_info = Some(format!("{}{}", detection.prefix, record.key()));
        }

        let directory = record
            .directory
            .take()
            .filter(|dir| dir.is_dir());

        match directory {
            Some(dir) => {
                if let Some(owner) = installed.find_owner(&dir) {
                    if owner.package != record.package || owner.version != record.version {
                        debug!(
                            "Ignoring {}: {} already belongs to {}",
                            record.key(),
                            dir.display(),
                            owner.package
                        );
                        continue;
                    }
                }
                if let Some(script) = &found.uninstall_script {
                    let target = dir.join(".Npackd").join("Uninstall.bat");
                    if !target.exists() {
                        if let Err(e) = write_script(&target, script) {
                            warn!("Cannot store removal script for {}: {}", record.key(), e);
                        }
                    }
                }
                record.directory = Some(dir);
            }
            None => {
                let dir = detected_dir.join(record.key());
                let script = found.uninstall_script.as_deref().unwrap_or(STUB_UNINSTALL);
                if let Err(e) = write_script(&dir.join(".Npackd").join("Uninstall.bat"), script)
                {
                    warn!(
                        "Cannot create detected directory for {}: {}",
                        record.key(),
                        e
                    );
                    continue;
                }
                record.directory = Some(dir);
            }
        }

        ensure_catalogued(catalog, &record)?;
        emitted.insert(record.key());
        installed.set_one(record);
    }

    if !detection.prefix.is_empty() {
        installed.retain_detected(&detection.prefix, &emitted);
    }

    Ok(())
}

/// Make sure the catalogue knows the package and version of a detected
/// record; existing entries are left untouched
pub fn ensure_catalogued(catalog: &Catalog, record: &InstalledPackageVersion) -> Result<()> {
    if catalog.find_package(&record.package)?.is_none() {
        catalog.save_package(
            &crate::model::Package::new(&record.package, &record.package),
            false,
        )?;
    }
    if catalog
        .find_package_version(&record.package, &record.version)?
        .is_none()
    {
        catalog.save_package_version(
            &crate::model::PackageVersion::new(&record.package, record.version.normalize()),
            false,
        )?;
    }
    Ok(())
}

fn write_script(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
