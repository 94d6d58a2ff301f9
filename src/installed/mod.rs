// src/installed/mod.rs

//! The process-wide registry of installed package versions
//!
//! `InstalledPackages` owns the mapping of (package, version) to an
//! installation record, persisted in the Windows registry under
//! `Software\Npackd\Npackd\Packages\<name>-<version>`. All public methods
//! are thread-safe; a single mutex guards the map and is never held while
//! observers run or while registry or filesystem calls block.
//!
//! Status-change observers replace the original signal/slot wiring: they
//! are invoked after the map mutex is released, so an observer may call
//! back into this registry.

use crate::db::Catalog;
use crate::error::{Error, Result};
use crate::model::{Dependency, InstalledPackageVersion};
use crate::registry::{RegistryHive, PACKAGES_KEY};
use crate::version::Version;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

type StatusObserver = dyn Fn(&str, &Version) + Send + Sync;

#[derive(Default)]
pub struct InstalledPackages {
    /// Keyed by `InstalledPackageVersion::key()`
    data: Mutex<BTreeMap<String, InstalledPackageVersion>>,
    observers: Mutex<Vec<Box<StatusObserver>>>,
}

impl InstalledPackages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a status-change observer
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&str, &Version) + Send + Sync + 'static,
    {
        self.observers.lock().unwrap().push(Box::new(observer));
    }

    fn fire_status_changed(&self, package: &str, version: &Version) {
        let observers = self.observers.lock().unwrap();
        for observer in observers.iter() {
            observer(package, version);
        }
    }

    /// Drop all records without touching the registry
    pub fn clear(&self) {
        self.data.lock().unwrap().clear();
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Find one installation record; returns a copy
    pub fn find(&self, package: &str, version: &Version) -> Option<InstalledPackageVersion> {
        let key = format!("{}-{}", package, version.normalize());
        self.data.lock().unwrap().get(&key).cloned()
    }

    pub fn is_installed(&self, package: &str, version: &Version) -> bool {
        self.find(package, version).is_some()
    }

    /// True if some installed version satisfies the dependency
    pub fn is_dependency_installed(&self, dep: &Dependency) -> bool {
        let data = self.data.lock().unwrap();
        data.values()
            .any(|ipv| ipv.package == dep.package && dep.matches(&ipv.version))
    }

    /// All records, as copies
    pub fn get_all(&self) -> Vec<InstalledPackageVersion> {
        self.data.lock().unwrap().values().cloned().collect()
    }

    /// All installed versions of one package
    pub fn get_by_package(&self, package: &str) -> Vec<InstalledPackageVersion> {
        let data = self.data.lock().unwrap();
        data.values()
            .filter(|ipv| ipv.package == package)
            .cloned()
            .collect()
    }

    /// Names of all packages with at least one installed version
    pub fn get_packages(&self) -> Vec<String> {
        let data = self.data.lock().unwrap();
        let mut names: HashSet<String> = HashSet::new();
        for ipv in data.values() {
            names.insert(ipv.package.clone());
        }
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names
    }

    /// The installed record with the highest version for a package
    pub fn get_newest_installed(&self, package: &str) -> Option<InstalledPackageVersion> {
        let data = self.data.lock().unwrap();
        data.values()
            .filter(|ipv| ipv.package == package)
            .max_by(|a, b| a.version.compare(&b.version))
            .cloned()
    }

    /// The record whose directory is an ancestor of `path`
    ///
    /// Used to avoid double-registering files that already belong to an
    /// installed package.
    pub fn find_owner(&self, path: &Path) -> Option<InstalledPackageVersion> {
        let data = self.data.lock().unwrap();
        data.values()
            .find(|ipv| {
                ipv.directory
                    .as_deref()
                    .map(|dir| path.starts_with(dir))
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Fast path for the CLI: read the installation directory of the
    /// newest version satisfying `dep` directly from the registry, without
    /// loading the whole table
    pub fn find_path(hive: &dyn RegistryHive, dep: &Dependency) -> Result<Option<PathBuf>> {
        let mut best: Option<(Version, PathBuf)> = None;
        for name in hive.list_sub_keys(PACKAGES_KEY, false)? {
            let Some((package, version)) = InstalledPackageVersion::parse_key(&name) else {
                continue;
            };
            if package != dep.package || !dep.matches(&version) {
                continue;
            }
            let key = format!("{}\\{}", PACKAGES_KEY, name);
            let Some(path) = hive.get_string(&key, "Path", false)? else {
                continue;
            };
            let path = path.trim();
            if path.is_empty() {
                continue;
            }
            let replace = best
                .as_ref()
                .map(|(v, _)| v.compare(&version) == std::cmp::Ordering::Less)
                .unwrap_or(true);
            if replace {
                best = Some((version, PathBuf::from(path)));
            }
        }
        Ok(best.map(|(_, path)| path))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Register an installed package version with its directory
    ///
    /// `directory` must be non-empty. With `update_registry` the record is
    /// persisted immediately as an owned (non-external) installation.
    pub fn set_package_version_path(
        &self,
        hive: &dyn RegistryHive,
        package: &str,
        version: &Version,
        directory: &Path,
        update_registry: bool,
    ) -> Result<()> {
        if directory.as_os_str().is_empty() {
            return Err(Error::Internal(format!(
                "Empty installation directory for {} {}",
                package, version
            )));
        }

        let mut ipv = InstalledPackageVersion::with_directory(
            package,
            version.clone(),
            directory.to_path_buf(),
            false,
        );

        {
            let mut data = self.data.lock().unwrap();
            // keep detection info of an existing record
            if let Some(existing) = data.get(&ipv.key()) {
                ipv.detection_info = existing.detection_info.clone();
            }
            data.insert(ipv.key(), ipv.clone());
        }

        if update_registry {
            Self::save_record(hive, &ipv)?;
        }

        self.fire_status_changed(package, version);
        Ok(())
    }

    /// Insert or update one record; used by the detectors
    pub fn set_one(&self, ipv: InstalledPackageVersion) {
        let package = ipv.package.clone();
        let version = ipv.version.clone();
        self.data.lock().unwrap().insert(ipv.key(), ipv);
        self.fire_status_changed(&package, &version);
    }

    /// Remove all records of a package, including their registry entries
    pub fn remove(&self, hive: &dyn RegistryHive, package: &str) -> Result<()> {
        let removed: Vec<InstalledPackageVersion> = {
            let mut data = self.data.lock().unwrap();
            let keys: Vec<String> = data
                .values()
                .filter(|ipv| ipv.package == package)
                .map(|ipv| ipv.key())
                .collect();
            keys.iter().filter_map(|k| data.remove(k)).collect()
        };

        for ipv in &removed {
            hive.delete_sub_key(&format!("{}\\{}", PACKAGES_KEY, ipv.key()))?;
            self.fire_status_changed(&ipv.package, &ipv.version);
        }
        Ok(())
    }

    /// Remove one record and its registry entry
    pub fn remove_version(
        &self,
        hive: &dyn RegistryHive,
        package: &str,
        version: &Version,
    ) -> Result<()> {
        let key = format!("{}-{}", package, version.normalize());
        let removed = self.data.lock().unwrap().remove(&key);
        if removed.is_some() {
            hive.delete_sub_key(&format!("{}\\{}", PACKAGES_KEY, key))?;
            self.fire_status_changed(package, version);
        }
        Ok(())
    }

    /// Drop the in-memory external records of a package; detectors call
    /// this before re-registering what they find
    pub fn remove_external(&self, package: &str) {
        let mut data = self.data.lock().unwrap();
        data.retain(|_, ipv| !(ipv.package == package && ipv.external));
    }

    /// Remove records owned by a detection prefix that were not re-emitted
    /// in the current pass: the prefix owns its set
    pub fn retain_detected(&self, prefix: &str, emitted: &HashSet<String>) {
        let mut data = self.data.lock().unwrap();
        data.retain(|key, ipv| {
            let owned = ipv
                .detection_info
                .as_deref()
                .map(|info| info.starts_with(prefix))
                .unwrap_or(false);
            !owned || emitted.contains(key)
        });
    }

    // ------------------------------------------------------------------
    // Registry persistence
    // ------------------------------------------------------------------

    fn save_record(hive: &dyn RegistryHive, ipv: &InstalledPackageVersion) -> Result<()> {
        let key = format!("{}\\{}", PACKAGES_KEY, ipv.key());
        let path = ipv
            .directory
            .as_deref()
            .map(|d| d.to_string_lossy().to_string())
            .unwrap_or_default();
        hive.set_string(&key, "Path", &path)?;
        hive.set_dword(&key, "External", if ipv.external { 1 } else { 0 })?;
        if let Some(info) = &ipv.detection_info {
            hive.set_string(&key, "DetectionInfo", info)?;
        }
        Ok(())
    }

    /// Rebuild the in-memory map from the registry sub-tree
    ///
    /// Sub-key names that do not parse as `<package>-<version>` are skipped
    /// silently, as are records whose directory no longer exists.
    pub fn read_registry_database(&self, hive: &dyn RegistryHive) -> Result<()> {
        let mut fresh = BTreeMap::new();

        for name in hive.list_sub_keys(PACKAGES_KEY, false)? {
            let Some((package, version)) = InstalledPackageVersion::parse_key(&name) else {
                debug!("Skipping registry entry with unparsable name: {}", name);
                continue;
            };

            let key = format!("{}\\{}", PACKAGES_KEY, name);
            let path = hive
                .get_string(&key, "Path", false)?
                .unwrap_or_default()
                .trim()
                .to_string();
            let external = hive.get_dword(&key, "External", false)?.unwrap_or(1) != 0;
            let detection_info = hive.get_string(&key, "DetectionInfo", false)?;

            if path.is_empty() {
                continue;
            }
            let directory = PathBuf::from(&path);
            if !directory.is_dir() {
                debug!(
                    "Skipping {}: directory {} does not exist",
                    name, directory.display()
                );
                continue;
            }

            let mut ipv = InstalledPackageVersion::with_directory(
                package,
                version,
                directory,
                external,
            );
            ipv.detection_info = detection_info;
            fresh.insert(ipv.key(), ipv);
        }

        *self.data.lock().unwrap() = fresh;
        Ok(())
    }

    /// Flush every record back to the registry
    pub fn save(&self, hive: &dyn RegistryHive) -> Result<()> {
        for ipv in self.get_all() {
            Self::save_record(hive, &ipv)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dependencies and hooks
    // ------------------------------------------------------------------

    /// Re-evaluate the dependency-missing flag on every record
    pub fn mark_missing_dependencies(&self, catalog: &Catalog) -> Result<()> {
        let records = self.get_all();
        for record in records {
            let missing = match catalog.find_package_version(&record.package, &record.version)? {
                Some(pv) => pv
                    .dependencies
                    .iter()
                    .any(|dep| !self.is_dependency_installed(dep)),
                None => false,
            };
            let mut data = self.data.lock().unwrap();
            if let Some(entry) = data.get_mut(&record.key()) {
                entry.dependency_missing = missing;
            }
        }
        Ok(())
    }

    /// The first record whose stored dependencies are not all satisfied
    pub fn find_first_with_missing_dependency(
        &self,
        catalog: &Catalog,
    ) -> Result<Option<InstalledPackageVersion>> {
        for record in self.get_all() {
            if let Some(pv) = catalog.find_package_version(&record.package, &record.version)? {
                if pv
                    .dependencies
                    .iter()
                    .any(|dep| !self.is_dependency_installed(dep))
                {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Invoke the `.Npackd\InstallHook.bat` of every other installed
    /// package. Best-effort: failures are logged, never propagated.
    pub fn notify_installed(&self, package: &str, version: &Version, success: bool) {
        let own_key = format!("{}-{}", package, version.normalize());
        for ipv in self.get_all() {
            if ipv.key() == own_key {
                continue;
            }
            let Some(dir) = &ipv.directory else { continue };
            let hook = dir.join(".Npackd").join("InstallHook.bat");
            if !hook.is_file() {
                continue;
            }
            if let Err(e) = run_hook(&hook, package, version, success) {
                warn!(
                    "InstallHook of {} failed for {} {}: {}",
                    ipv.package, package, version, e
                );
            }
        }
    }
}

#[cfg(windows)]
fn run_hook(hook: &Path, package: &str, version: &Version, success: bool) -> Result<()> {
    let status = std::process::Command::new("cmd")
        .arg("/C")
        .arg(hook)
        .arg(package)
        .arg(version.to_string())
        .arg(if success { "1" } else { "0" })
        .status()
        .map_err(|e| Error::Filesystem(e.to_string()))?;
    if !status.success() {
        return Err(Error::Internal(format!("Exit status {}", status)));
    }
    Ok(())
}

#[cfg(not(windows))]
fn run_hook(hook: &Path, package: &str, version: &Version, _success: bool) -> Result<()> {
    debug!(
        "Would run {} for {} {}",
        hook.display(),
        package,
        version
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryHive;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_set_and_find() {
        let installed = InstalledPackages::new();
        let hive = MemoryHive::new();
        let dir = tempfile::tempdir().unwrap();

        installed
            .set_package_version_path(&hive, "a.b.Foo", &v("1.0"), dir.path(), true)
            .unwrap();

        let found = installed.find("a.b.Foo", &v("1.0")).unwrap();
        assert_eq!(found.directory.as_deref(), Some(dir.path()));
        assert!(!found.external);
        assert!(installed.is_installed("a.b.Foo", &v("1.0")));
        assert!(!installed.is_installed("a.b.Foo", &v("2.0")));

        // normalized versions address the same record
        assert!(installed.is_installed("a.b.Foo", &v("1.0.0")));

        installed.clear();
        assert!(installed.get_all().is_empty());
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let installed = InstalledPackages::new();
        let hive = MemoryHive::new();
        let result = installed.set_package_version_path(
            &hive,
            "a.b.Foo",
            &v("1.0"),
            Path::new(""),
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_registry_round_trip() {
        let hive = MemoryHive::new();
        let dir = tempfile::tempdir().unwrap();

        let installed = InstalledPackages::new();
        installed
            .set_package_version_path(&hive, "a.b.Foo", &v("1.0"), dir.path(), true)
            .unwrap();

        let reloaded = InstalledPackages::new();
        reloaded.read_registry_database(&hive).unwrap();
        let found = reloaded.find("a.b.Foo", &v("1.0")).unwrap();
        assert_eq!(found.directory.as_deref(), Some(dir.path()));
        assert!(!found.external);
    }

    #[test]
    fn test_read_registry_skips_missing_directories() {
        let hive = MemoryHive::new();
        let key = format!("{}\\a.b.Gone-1.0", PACKAGES_KEY);
        hive.set_string(&key, "Path", "/nonexistent/path/xyz").unwrap();
        hive.set_dword(&key, "External", 0).unwrap();

        let installed = InstalledPackages::new();
        installed.read_registry_database(&hive).unwrap();
        assert!(installed.get_all().is_empty());
    }

    #[test]
    fn test_read_registry_skips_invalid_names() {
        let hive = MemoryHive::new();
        let dir = tempfile::tempdir().unwrap();
        let key = format!("{}\\not a valid key", PACKAGES_KEY);
        hive.set_string(&key, "Path", &dir.path().to_string_lossy())
            .unwrap();

        let installed = InstalledPackages::new();
        installed.read_registry_database(&hive).unwrap();
        assert!(installed.get_all().is_empty());
    }

    #[test]
    fn test_find_owner() {
        let installed = InstalledPackages::new();
        let hive = MemoryHive::new();
        let dir = tempfile::tempdir().unwrap();
        installed
            .set_package_version_path(&hive, "a.b.Foo", &v("1.0"), dir.path(), false)
            .unwrap();

        let owner = installed
            .find_owner(&dir.path().join("sub").join("x.txt"))
            .unwrap();
        assert_eq!(owner.package, "a.b.Foo");
        assert!(installed.find_owner(Path::new("/somewhere/else")).is_none());
    }

    #[test]
    fn test_get_newest_installed() {
        let installed = InstalledPackages::new();
        for s in ["1.0", "2.0", "1.5"] {
            let mut ipv = InstalledPackageVersion::new("a.b.Foo", v(s));
            ipv.external = true;
            installed.set_one(ipv);
        }
        assert_eq!(
            installed.get_newest_installed("a.b.Foo").unwrap().version,
            v("2.0")
        );
        assert!(installed.get_newest_installed("a.b.Bar").is_none());
    }

    #[test]
    fn test_dependency_lookup() {
        let installed = InstalledPackages::new();
        installed.set_one(InstalledPackageVersion::new("a.b.Foo", v("1.5")));

        let dep = Dependency::new("a.b.Foo", v("1"), v("2"));
        assert!(installed.is_dependency_installed(&dep));

        let dep = Dependency::new("a.b.Foo", v("2"), v("3"));
        assert!(!installed.is_dependency_installed(&dep));
    }

    #[test]
    fn test_find_path_uses_registry_directly() {
        let hive = MemoryHive::new();
        for (name, path) in [("a.b.Foo-1.0", "C:\\foo1"), ("a.b.Foo-1.5", "C:\\foo15")] {
            let key = format!("{}\\{}", PACKAGES_KEY, name);
            hive.set_string(&key, "Path", path).unwrap();
        }

        let dep = Dependency::new("a.b.Foo", v("1"), v("2"));
        let path = InstalledPackages::find_path(&hive, &dep).unwrap().unwrap();
        assert_eq!(path, PathBuf::from("C:\\foo15"));

        let dep = Dependency::new("a.b.Bar", v("1"), v("2"));
        assert!(InstalledPackages::find_path(&hive, &dep).unwrap().is_none());
    }

    #[test]
    fn test_remove_deletes_registry_entries() {
        let installed = InstalledPackages::new();
        let hive = MemoryHive::new();
        let dir = tempfile::tempdir().unwrap();
        installed
            .set_package_version_path(&hive, "a.b.Foo", &v("1.0"), dir.path(), true)
            .unwrap();

        installed.remove(&hive, "a.b.Foo").unwrap();
        assert!(installed.get_all().is_empty());
        assert!(hive.list_sub_keys(PACKAGES_KEY, false).unwrap().is_empty());
    }

    #[test]
    fn test_retain_detected_prefix_owns_its_set() {
        let installed = InstalledPackages::new();
        let mut a = InstalledPackageVersion::new("a.b.Foo", v("1.0"));
        a.detection_info = Some("control-panel:foo".to_string());
        let mut b = InstalledPackageVersion::new("a.b.Bar", v("1.0"));
        b.detection_info = Some("control-panel:bar".to_string());
        let c = InstalledPackageVersion::new("a.b.Plain", v("1.0"));
        installed.set_one(a.clone());
        installed.set_one(b);
        installed.set_one(c);

        let mut emitted = HashSet::new();
        emitted.insert(a.key());
        installed.retain_detected("control-panel:", &emitted);

        assert!(installed.is_installed("a.b.Foo", &v("1.0")));
        assert!(!installed.is_installed("a.b.Bar", &v("1.0")));
        // records without the prefix are untouched
        assert!(installed.is_installed("a.b.Plain", &v("1.0")));
    }

    #[test]
    fn test_status_observers_fire() {
        let installed = InstalledPackages::new();
        let hive = MemoryHive::new();
        let dir = tempfile::tempdir().unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        installed.add_observer(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        installed
            .set_package_version_path(&hive, "a.b.Foo", &v("1.0"), dir.path(), false)
            .unwrap();
        installed.remove(&hive, "a.b.Foo").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_notify_installed_is_best_effort() {
        let installed = InstalledPackages::new();
        let dir = tempfile::tempdir().unwrap();
        let hook_dir = dir.path().join(".Npackd");
        std::fs::create_dir_all(&hook_dir).unwrap();
        std::fs::write(hook_dir.join("InstallHook.bat"), "@echo off\r\n").unwrap();

        installed.set_one(InstalledPackageVersion::with_directory(
            "a.b.Hooked",
            v("1.0"),
            dir.path().to_path_buf(),
            false,
        ));

        // must not fail even if hooks cannot run
        installed.notify_installed("a.b.Foo", &v("2.0"), true);
    }

    #[test]
    fn test_missing_dependency_detection() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut pv = crate::model::PackageVersion::new("a.b.Foo", v("1.0"));
        pv.dependencies
            .push(Dependency::new("a.b.Bar", v("1"), v("2")));
        catalog.save_package_version(&pv, true).unwrap();

        let installed = InstalledPackages::new();
        installed.set_one(InstalledPackageVersion::new("a.b.Foo", v("1.0")));

        let first = installed
            .find_first_with_missing_dependency(&catalog)
            .unwrap()
            .unwrap();
        assert_eq!(first.package, "a.b.Foo");

        installed.set_one(InstalledPackageVersion::new("a.b.Bar", v("1.5")));
        assert!(installed
            .find_first_with_missing_dependency(&catalog)
            .unwrap()
            .is_none());
    }
}
