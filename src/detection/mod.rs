// src/detection/mod.rs

//! Software detection
//!
//! `refresh` rebuilds the installed-packages registry from machine state.
//! Detectors run strictly in order, each in its own job slice, and a
//! failing detector is logged and skipped; one bad pass may not block the
//! remainder. Detection is idempotent: two refreshes against an unchanged
//! machine produce the same installed set.

pub mod third_party;

use crate::db::{Catalog, Locations};
use crate::error::Result;
use crate::installed::InstalledPackages;
use crate::job::Job;
use crate::model::{InstalledPackageVersion, PackageVersion};
use crate::registry::{RegistryHive, NPACKD_KEY, PACKAGES_KEY};
use crate::repository::loader::hex_sha1_file;
use crate::system::SystemProbe;
use crate::version::Version;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use third_party::ThirdPartyPM;

const WINDOWS_PACKAGE: &str = "com.microsoft.Windows";
const WINDOWS32_PACKAGE: &str = "com.microsoft.Windows32";
const WINDOWS64_PACKAGE: &str = "com.microsoft.Windows64";
const JRE_PACKAGE: &str = "com.oracle.JRE";
const JRE64_PACKAGE: &str = "com.oracle.JRE64";
const JDK_PACKAGE: &str = "com.oracle.JDK";
const JDK64_PACKAGE: &str = "com.oracle.JDK64";
const DOTNET_PACKAGE: &str = "com.microsoft.DotNetRedistributable";
const INSTALLER_PACKAGE: &str = "com.microsoft.WindowsInstaller";
const MSXML_PACKAGE: &str = "com.microsoft.MSXML";
const NPACKDCL_PACKAGE: &str = "com.googlecode.windows-package-manager.NpackdCL";

const JRE_KEY: &str = r"Software\JavaSoft\Java Runtime Environment";
const JDK_KEY: &str = r"Software\JavaSoft\Java Development Kit";
const NDP_KEY: &str = r"Software\Microsoft\NET Framework Setup\NDP";

/// Everything a detector may consult
pub struct DetectionContext<'a> {
    pub catalog: &'a Catalog,
    pub installed: &'a InstalledPackages,
    pub hive: &'a dyn RegistryHive,
    pub probe: &'a dyn SystemProbe,
    pub locations: &'a Locations,
    pub third_party: &'a [Box<dyn ThirdPartyPM>],
}

type DetectorFn = fn(&DetectionContext) -> Result<()>;

/// The ordered passes of a refresh
const DETECTORS: &[(&str, DetectorFn)] = &[
    (
        "Detecting packages installed by Npackd 1.14 or earlier",
        detect_pre_1_15_packages,
    ),
    ("Reading registry package database", read_registry_database),
    ("Detecting Windows", detect_windows),
    ("Detecting JRE", detect_jre),
    ("Detecting JDK", detect_jdk),
    ("Detecting .NET", detect_dotnet),
    ("Detecting MSI packages", detect_msi_products),
    ("Detecting Windows Installer", detect_windows_installer),
    (
        "Detecting Microsoft Core XML Services (MSXML)",
        detect_msxml,
    ),
    (
        "Detecting software from other package managers",
        detect_third_party,
    ),
    ("Scanning for packages by file hashes", scan_detect_files),
    ("Updating NPACKD_CL", update_npackd_cl_env_var),
    (
        "Detecting packages installed by Npackd 1.14 or earlier (2)",
        scan_pre_1_15_dir_exact,
    ),
];

/// Run all detectors in order and rebuild the installed set
pub fn refresh(ctx: &DetectionContext, job: &mut Job) -> Result<()> {
    let weight = 1.0 / DETECTORS.len() as f64;
    let mut done = 0.0;

    for (hint, detector) in DETECTORS {
        job.check_cancelled()?;
        job.set_hint(hint);
        if let Err(e) = detector(ctx) {
            warn!("{} failed: {}", hint, e);
        }
        done += weight;
        job.set_progress(done);
    }

    job.complete();
    Ok(())
}

fn read_registry_database(ctx: &DetectionContext) -> Result<()> {
    ctx.installed.read_registry_database(ctx.hive)
}

fn detect_jre(ctx: &DetectionContext) -> Result<()> {
    detect_java(ctx, JRE_PACKAGE, JRE_KEY, false)?;
    detect_java(ctx, JRE64_PACKAGE, JRE_KEY, true)
}

fn detect_jdk(ctx: &DetectionContext) -> Result<()> {
    detect_java(ctx, JDK_PACKAGE, JDK_KEY, false)?;
    detect_java(ctx, JDK64_PACKAGE, JDK_KEY, true)
}

fn scan_pre_1_15_dir_exact(ctx: &DetectionContext) -> Result<()> {
    scan_pre_1_15_dir(ctx, true)
}

/// Register an externally detected installation unless a record exists
fn register_external(
    ctx: &DetectionContext,
    package: &str,
    version: &Version,
    directory: PathBuf,
) -> Result<()> {
    let version = version.normalize();
    ensure_version(ctx, package, &version)?;
    if ctx.installed.find(package, &version).is_none() {
        ctx.installed.set_one(InstalledPackageVersion::with_directory(
            package, version, directory, true,
        ));
    }
    Ok(())
}

fn ensure_version(ctx: &DetectionContext, package: &str, version: &Version) -> Result<()> {
    let record = InstalledPackageVersion::new(package, version.clone());
    third_party::ensure_catalogued(ctx.catalog, &record)
}

// ----------------------------------------------------------------------
// Pre-1.15 directory layout
// ----------------------------------------------------------------------

/// One-time scan of the install root for `<package>-<version>` directories
/// left behind by old releases; gated by the `Pre1_15DirScanned` flag
fn detect_pre_1_15_packages(ctx: &DetectionContext) -> Result<()> {
    let scanned = ctx
        .hive
        .get_dword(NPACKD_KEY, "Pre1_15DirScanned", false)?
        .unwrap_or(0);
    if scanned == 1 {
        return Ok(());
    }
    scan_pre_1_15_dir(ctx, false)?;
    ctx.hive.set_dword(NPACKD_KEY, "Pre1_15DirScanned", 1)?;
    Ok(())
}

/// Write registry entries for install-root directories whose names parse
/// as `<package>-<version>`. With `exact`, only packages the catalogue
/// knows are accepted.
fn scan_pre_1_15_dir(ctx: &DetectionContext, exact: bool) -> Result<()> {
    let root = &ctx.locations.install_dir;
    if !root.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((package, version)) = InstalledPackageVersion::parse_key(&name) else {
            continue;
        };
        if exact && ctx.catalog.find_package(&package)?.is_none() {
            continue;
        }

        // normalized version strings fix entries written by old releases
        let key = format!("{}\\{}-{}", PACKAGES_KEY, package, version.normalize());
        ctx.hive
            .set_string(&key, "Path", &entry.path().to_string_lossy())?;
        ctx.hive.set_dword(&key, "External", 0)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Operating system
// ----------------------------------------------------------------------

fn detect_windows(ctx: &DetectionContext) -> Result<()> {
    ctx.installed.remove_external(WINDOWS_PACKAGE);
    ctx.installed.remove_external(WINDOWS32_PACKAGE);
    ctx.installed.remove_external(WINDOWS64_PACKAGE);

    let Some(version) = ctx.probe.os_version() else {
        return Ok(());
    };
    let windows_dir = ctx.probe.windows_dir();

    register_external(ctx, WINDOWS_PACKAGE, &version, windows_dir.clone())?;
    let bitness_package = if ctx.probe.is_64_bit() {
        WINDOWS64_PACKAGE
    } else {
        WINDOWS32_PACKAGE
    };
    register_external(ctx, bitness_package, &version, windows_dir)
}

// ----------------------------------------------------------------------
// Java
// ----------------------------------------------------------------------

/// JRE/JDK detection via the JavaSoft registry keys
///
/// Sub-key names are versions with underscores ("1.7.0_45"); entries with
/// fewer than three parts are aliases like "1.7" and skipped. On 64-bit
/// hosts the 32-bit packages read the 32-bit registry view.
fn detect_java(
    ctx: &DetectionContext,
    package: &str,
    registry_key: &str,
    w64: bool,
) -> Result<()> {
    ctx.installed.remove_external(package);

    if w64 && !ctx.probe.is_64_bit() {
        return Ok(());
    }
    let use32 = !w64 && ctx.probe.is_64_bit();

    for entry in ctx.hive.list_sub_keys(registry_key, use32)? {
        let Ok(version) = Version::parse(&entry) else {
            continue;
        };
        if version.n_parts() <= 2 {
            continue;
        }

        let key = format!("{}\\{}", registry_key, entry);
        let Some(home) = ctx.hive.get_string(&key, "JavaHome", use32)? else {
            continue;
        };
        let home = PathBuf::from(home);
        if !home.is_dir() {
            continue;
        }

        register_external(ctx, package, &version, home)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// .NET
// ----------------------------------------------------------------------

fn detect_dotnet(ctx: &DetectionContext) -> Result<()> {
    ctx.installed.remove_external(DOTNET_PACKAGE);

    for entry in ctx.hive.list_sub_keys(NDP_KEY, false)? {
        let Some(rest) = entry.strip_prefix('v') else {
            continue;
        };
        let Ok(key_version) = Version::parse(rest) else {
            continue;
        };
        if let Err(e) = detect_one_dotnet(ctx, &entry, &key_version) {
            warn!(".NET detection for {} failed: {}", entry, e);
        }
    }
    Ok(())
}

/// The version source depends on the key: before 2.0 the key name is the
/// version, before 4.0 the "Version" value, from 4.0 on the value under
/// the "Full" sub-key
fn detect_one_dotnet(
    ctx: &DetectionContext,
    key_name: &str,
    key_version: &Version,
) -> Result<()> {
    let one_one = Version::from_parts(&[1, 1]);
    let two = Version::from_parts(&[2, 0]);
    let four = Version::from_parts(&[4, 0]);

    let key = format!("{}\\{}", NDP_KEY, key_name);
    let version = if key_version.compare(&one_one) == std::cmp::Ordering::Less {
        None
    } else if key_version.compare(&two) == std::cmp::Ordering::Less {
        Some(key_version.clone())
    } else if key_version.compare(&four) == std::cmp::Ordering::Less {
        ctx.hive
            .get_string(&key, "Version", false)?
            .and_then(|s| Version::parse(&s).ok())
    } else {
        ctx.hive
            .get_string(&format!("{}\\Full", key), "Version", false)?
            .and_then(|s| Version::parse(&s).ok())
    };

    if let Some(version) = version {
        register_external(ctx, DOTNET_PACKAGE, &version, ctx.probe.windows_dir())?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// MSI products
// ----------------------------------------------------------------------

/// Register catalogue versions whose MSI product code is installed;
/// records of product codes that disappeared are removed
fn detect_msi_products(ctx: &DetectionContext) -> Result<()> {
    let mut emitted = HashSet::new();

    for guid in ctx.probe.installed_msi_products() {
        let Some(pv) = ctx.catalog.find_package_version_by_msi_guid(&guid)? else {
            continue;
        };

        let location = ctx
            .probe
            .msi_product_location(&guid)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| ctx.probe.windows_dir());

        let existing = ctx.installed.find(&pv.package, &pv.version);
        let keep_own = existing.as_ref().map(|e| !e.external).unwrap_or(false);
        if !keep_own {
            let mut record = InstalledPackageVersion::with_directory(
                &pv.package,
                pv.version.normalize(),
                location,
                true,
            );
            record.detection_info = Some(format!("msi:{}", guid));
            emitted.insert(record.key());
            ctx.installed.set_one(record);
        } else if let Some(existing) = existing {
            emitted.insert(existing.key());
        }
    }

    ctx.installed.retain_detected("msi:", &emitted);
    Ok(())
}

// ----------------------------------------------------------------------
// DLL versions
// ----------------------------------------------------------------------

fn detect_windows_installer(ctx: &DetectionContext) -> Result<()> {
    ctx.installed.remove_external(INSTALLER_PACKAGE);

    if let Some(version) = ctx.probe.dll_version("msi.dll") {
        if !is_zero(&version) {
            register_external(ctx, INSTALLER_PACKAGE, &version, ctx.probe.windows_dir())?;
        }
    }
    Ok(())
}

fn detect_msxml(ctx: &DetectionContext) -> Result<()> {
    ctx.installed.remove_external(MSXML_PACKAGE);

    for dll in [
        "msxml.dll",
        "msxml2.dll",
        "msxml3.dll",
        "msxml4.dll",
        "msxml5.dll",
        "msxml6.dll",
    ] {
        let Some(mut version) = ctx.probe.dll_version(dll) else {
            continue;
        };
        if is_zero(&version) {
            continue;
        }
        if dll == "msxml3.dll" {
            // msxml3.dll carries a 8.x file version; the leading 3 keeps it
            // apart from msxml.dll under the shared package
            version.prepend(3);
        }
        register_external(ctx, MSXML_PACKAGE, &version, ctx.probe.windows_dir())?;
    }
    Ok(())
}

fn is_zero(version: &Version) -> bool {
    version.compare(&Version::from_parts(&[0])) == std::cmp::Ordering::Equal
}

// ----------------------------------------------------------------------
// Third-party package managers
// ----------------------------------------------------------------------

fn detect_third_party(ctx: &DetectionContext) -> Result<()> {
    for pm in ctx.third_party {
        match pm.detect() {
            Ok(detection) => {
                third_party::apply(
                    ctx.catalog,
                    ctx.installed,
                    &ctx.locations.detected_dir(),
                    detection,
                )?;
            }
            Err(e) => warn!("Third-party detection failed: {}", e),
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Detect files
// ----------------------------------------------------------------------

/// Recognise installations by content: a directory matches a package
/// version when every detect file exists below it with the expected SHA-1
fn scan_detect_files(ctx: &DetectionContext) -> Result<()> {
    let candidates: Vec<PackageVersion> = ctx
        .catalog
        .get_package_versions_with_detect_files()?
        .into_iter()
        .filter(|pv| ctx.installed.find(&pv.package, &pv.version).is_none())
        .collect();
    if candidates.is_empty() {
        return Ok(());
    }

    let root = ctx.locations.install_dir.clone();
    if root.is_dir() {
        scan_dir(ctx, &root, &candidates)?;
    }
    Ok(())
}

fn scan_dir(
    ctx: &DetectionContext,
    dir: &Path,
    candidates: &[PackageVersion],
) -> Result<()> {
    let mut sha1_cache: HashMap<String, String> = HashMap::new();

    for pv in candidates {
        if ctx.installed.find(&pv.package, &pv.version).is_some() {
            continue;
        }
        let mut all_match = true;
        for df in &pv.detect_files {
            let file = dir.join(&df.path);
            let matches = file.is_file()
                && match sha1_cache.get(&df.path) {
                    Some(sha1) => *sha1 == df.sha1,
                    None => match hex_sha1_file(&file) {
                        Ok(sha1) => {
                            let ok = sha1 == df.sha1;
                            sha1_cache.insert(df.path.clone(), sha1);
                            ok
                        }
                        Err(_) => false,
                    },
                };
            if !matches {
                all_match = false;
                break;
            }
        }

        if all_match {
            debug!("Recognised {} at {}", pv, dir.display());
            register_external(ctx, &pv.package, &pv.version, dir.to_path_buf())?;
            return Ok(());
        }
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_dir(ctx, &path, candidates)?;
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// NPACKD_CL
// ----------------------------------------------------------------------

/// Point the system NPACKD_CL variable at the newest installed NpackdCL
fn update_npackd_cl_env_var(ctx: &DetectionContext) -> Result<()> {
    let value = ctx
        .installed
        .get_newest_installed(NPACKDCL_PACKAGE)
        .and_then(|ipv| ipv.directory)
        .map(|dir| dir.to_string_lossy().to_string())
        .unwrap_or_default();

    let current = ctx.probe.get_system_env("NPACKD_CL").unwrap_or_default();
    if value != current {
        ctx.probe.set_system_env("NPACKD_CL", &value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryHive;
    use crate::system::MockProbe;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    struct Fixture {
        catalog: Catalog,
        installed: InstalledPackages,
        hive: MemoryHive,
        probe: MockProbe,
        locations: Locations,
        _scratch: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let scratch = tempfile::tempdir().unwrap();
            let mut probe = MockProbe::new();
            probe.windows_dir = scratch.path().join("windows");
            std::fs::create_dir_all(&probe.windows_dir).unwrap();
            Self {
                catalog: Catalog::open_in_memory().unwrap(),
                installed: InstalledPackages::new(),
                hive: MemoryHive::new(),
                probe,
                locations: Locations::under(scratch.path()),
                _scratch: scratch,
            }
        }

        fn ctx(&self) -> DetectionContext<'_> {
            DetectionContext {
                catalog: &self.catalog,
                installed: &self.installed,
                hive: &self.hive,
                probe: &self.probe,
                locations: &self.locations,
                third_party: &[],
            }
        }
    }

    #[test]
    fn test_detect_windows_64_bit() {
        let mut f = Fixture::new();
        f.probe.os_version = Some(v("6.1.7601"));
        f.probe.is_64_bit = true;

        detect_windows(&f.ctx()).unwrap();

        assert!(f.installed.is_installed(WINDOWS_PACKAGE, &v("6.1.7601")));
        assert!(f.installed.is_installed(WINDOWS64_PACKAGE, &v("6.1.7601")));
        assert!(!f.installed.is_installed(WINDOWS32_PACKAGE, &v("6.1.7601")));
        // the catalogue learned the version
        assert!(f
            .catalog
            .find_package_version(WINDOWS_PACKAGE, &v("6.1.7601"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_detect_java_parses_underscore_versions() {
        let f = Fixture::new();
        let home = f.locations.install_dir.join("jre7");
        std::fs::create_dir_all(&home).unwrap();

        let key = format!("{}\\1.7.0_45", JRE_KEY);
        f.hive
            .set_string(&key, "JavaHome", &home.to_string_lossy())
            .unwrap();
        // a two-part alias key must be skipped
        f.hive
            .set_string(&format!("{}\\1.7", JRE_KEY), "JavaHome", &home.to_string_lossy())
            .unwrap();

        detect_java(&f.ctx(), JRE_PACKAGE, JRE_KEY, false).unwrap();

        let all = f.installed.get_by_package(JRE_PACKAGE);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, v("1.7.0.45"));
        assert_eq!(all[0].directory.as_deref(), Some(home.as_path()));
    }

    #[test]
    fn test_detect_java_ignores_missing_home() {
        let f = Fixture::new();
        let key = format!("{}\\1.8.0_10", JRE_KEY);
        f.hive
            .set_string(&key, "JavaHome", "/nonexistent/jre")
            .unwrap();

        detect_java(&f.ctx(), JRE_PACKAGE, JRE_KEY, false).unwrap();
        assert!(f.installed.get_by_package(JRE_PACKAGE).is_empty());
    }

    #[test]
    fn test_detect_dotnet_version_sources() {
        let f = Fixture::new();
        // v1.1.4322: key name is the version
        f.hive
            .set_string(&format!("{}\\v1.1.4322", NDP_KEY), "Install", "1")
            .unwrap();
        // v3.5: Version value
        f.hive
            .set_string(&format!("{}\\v3.5", NDP_KEY), "Version", "3.5.30729.1")
            .unwrap();
        // v4: Full\Version value
        f.hive
            .set_string(&format!("{}\\v4\\Full", NDP_KEY), "Version", "4.8.04084")
            .unwrap();
        // v1.0 is below 1.1 and skipped
        f.hive
            .set_string(&format!("{}\\v1.0", NDP_KEY), "Version", "1.0.3705")
            .unwrap();

        detect_dotnet(&f.ctx()).unwrap();

        let versions: HashSet<String> = f
            .installed
            .get_by_package(DOTNET_PACKAGE)
            .iter()
            .map(|ipv| ipv.version.to_string())
            .collect();
        assert!(versions.contains("1.1.4322"));
        assert!(versions.contains("3.5.30729.1"));
        assert!(versions.contains("4.8.4084"));
        assert_eq!(versions.len(), 3);
    }

    #[test]
    fn test_detect_msi_products_add_and_remove() {
        let mut f = Fixture::new();
        let guid = "{11111111-2222-3333-4444-555555555555}";
        let mut pv = PackageVersion::new("a.b.Msi", v("1.0"));
        pv.msi_guid = Some(guid.to_string());
        f.catalog.save_package_version(&pv, true).unwrap();

        f.probe.msi_products = vec![guid.to_string()];
        let location = f.locations.install_dir.join("msiapp");
        f.probe
            .msi_locations
            .insert(guid.to_string(), location.clone());

        detect_msi_products(&f.ctx()).unwrap();
        let record = f.installed.find("a.b.Msi", &v("1.0")).unwrap();
        assert_eq!(record.directory.as_deref(), Some(location.as_path()));
        assert_eq!(record.detection_info.as_deref(), Some("msi:{11111111-2222-3333-4444-555555555555}"));

        // the product disappears: the record goes with it
        f.probe.msi_products.clear();
        detect_msi_products(&f.ctx()).unwrap();
        assert!(!f.installed.is_installed("a.b.Msi", &v("1.0")));
    }

    #[test]
    fn test_detect_msi_uses_windows_dir_fallback() {
        let mut f = Fixture::new();
        let guid = "{11111111-2222-3333-4444-555555555555}";
        let mut pv = PackageVersion::new("a.b.Msi", v("1.0"));
        pv.msi_guid = Some(guid.to_string());
        f.catalog.save_package_version(&pv, true).unwrap();
        f.probe.msi_products = vec![guid.to_string()];

        detect_msi_products(&f.ctx()).unwrap();
        let record = f.installed.find("a.b.Msi", &v("1.0")).unwrap();
        assert_eq!(record.directory.as_deref(), Some(f.probe.windows_dir.as_path()));
    }

    #[test]
    fn test_detect_msxml_prepends_3() {
        let mut f = Fixture::new();
        f.probe
            .dll_versions
            .insert("msxml3.dll".to_string(), v("8.110.7600.16385"));
        f.probe
            .dll_versions
            .insert("msxml6.dll".to_string(), v("6.30.7600.16385"));

        detect_msxml(&f.ctx()).unwrap();

        let versions: HashSet<String> = f
            .installed
            .get_by_package(MSXML_PACKAGE)
            .iter()
            .map(|ipv| ipv.version.to_string())
            .collect();
        assert!(versions.contains("3.8.110.7600.16385"));
        assert!(versions.contains("6.30.7600.16385"));
    }

    #[test]
    fn test_scan_detect_files() {
        let f = Fixture::new();
        let app_dir = f.locations.install_dir.join("apps").join("foo");
        std::fs::create_dir_all(app_dir.join("bin")).unwrap();
        std::fs::write(app_dir.join("bin").join("foo.exe"), b"binary contents").unwrap();
        let sha1 = crate::repository::loader::hex_sha1(b"binary contents");

        let mut pv = PackageVersion::new("a.b.Foo", v("1.0"));
        pv.detect_files.push(crate::model::DetectFile {
            path: "bin/foo.exe".to_string(),
            sha1,
        });
        f.catalog.save_package_version(&pv, true).unwrap();

        scan_detect_files(&f.ctx()).unwrap();

        let record = f.installed.find("a.b.Foo", &v("1.0")).unwrap();
        assert_eq!(record.directory.as_deref(), Some(app_dir.as_path()));
        assert!(record.external);
    }

    #[test]
    fn test_scan_detect_files_requires_all_hashes() {
        let f = Fixture::new();
        let app_dir = f.locations.install_dir.join("foo");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("a.txt"), b"a").unwrap();

        let mut pv = PackageVersion::new("a.b.Foo", v("1.0"));
        pv.detect_files.push(crate::model::DetectFile {
            path: "a.txt".to_string(),
            sha1: crate::repository::loader::hex_sha1(b"a"),
        });
        pv.detect_files.push(crate::model::DetectFile {
            path: "missing.txt".to_string(),
            sha1: crate::repository::loader::hex_sha1(b"b"),
        });
        f.catalog.save_package_version(&pv, true).unwrap();

        scan_detect_files(&f.ctx()).unwrap();
        assert!(!f.installed.is_installed("a.b.Foo", &v("1.0")));
    }

    #[test]
    fn test_pre_1_15_scan_is_gated() {
        let f = Fixture::new();
        let dir = f.locations.install_dir.join("a.b.Foo-1.0");
        std::fs::create_dir_all(&dir).unwrap();

        detect_pre_1_15_packages(&f.ctx()).unwrap();
        assert_eq!(
            f.hive
                .get_dword(NPACKD_KEY, "Pre1_15DirScanned", false)
                .unwrap(),
            Some(1)
        );
        let key = format!("{}\\a.b.Foo-1", PACKAGES_KEY);
        assert_eq!(
            f.hive.get_string(&key, "Path", false).unwrap().as_deref(),
            Some(dir.to_string_lossy().as_ref())
        );

        // second run: gate is closed, new directories are not picked up
        let dir2 = f.locations.install_dir.join("a.b.Bar-2.0");
        std::fs::create_dir_all(&dir2).unwrap();
        detect_pre_1_15_packages(&f.ctx()).unwrap();
        let key2 = format!("{}\\a.b.Bar-2", PACKAGES_KEY);
        assert!(f.hive.get_string(&key2, "Path", false).unwrap().is_none());
    }

    #[test]
    fn test_npackd_cl_env_var() {
        let f = Fixture::new();
        let dir = f.locations.install_dir.join("npackdcl");
        std::fs::create_dir_all(&dir).unwrap();
        f.installed.set_one(InstalledPackageVersion::with_directory(
            NPACKDCL_PACKAGE,
            v("1.16"),
            dir.clone(),
            false,
        ));

        update_npackd_cl_env_var(&f.ctx()).unwrap();
        assert_eq!(
            f.probe.get_system_env("NPACKD_CL").unwrap(),
            dir.to_string_lossy()
        );
    }

    #[test]
    fn test_full_refresh_is_stable() {
        let mut f = Fixture::new();
        f.probe.os_version = Some(v("6.1.7601"));
        f.probe.is_64_bit = true;
        f.probe
            .dll_versions
            .insert("msi.dll".to_string(), v("5.0.7601"));

        refresh(&f.ctx(), &mut Job::new()).unwrap();
        let mut first: Vec<String> = f
            .installed
            .get_all()
            .iter()
            .map(|ipv| ipv.key())
            .collect();
        first.sort();
        assert!(!first.is_empty());

        refresh(&f.ctx(), &mut Job::new()).unwrap();
        let mut second: Vec<String> = f
            .installed
            .get_all()
            .iter()
            .map(|ipv| ipv.key())
            .collect();
        second.sort();

        assert_eq!(first, second);
    }
}
