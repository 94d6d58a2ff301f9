// src/manager.rs

//! The orchestrator owning all core state
//!
//! One `PackageManager` is constructed at startup and passed through the
//! call chains; tests construct independent instances with in-memory
//! components. It owns the catalogue, the installed-packages registry, the
//! registry hive, the machine probe, the third-party plugins and the
//! advisory lock table.

use crate::db::{Catalog, CategoryFilter, Locations};
use crate::detection::third_party::ThirdPartyPM;
use crate::detection::{self, DetectionContext};
use crate::error::Result;
use crate::installed::InstalledPackages;
use crate::job::Job;
use crate::model::{Dependency, InstallOperation, Package, PackageStatus};
use crate::planner::{self, Locks};
use crate::registry::{RegistryHive, INDEX_KEY};
use crate::repository::{loader, Repository};
use crate::search::{SearchFilter, SearchIndex};
use crate::system::SystemProbe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub struct PackageManager {
    pub catalog: Catalog,
    pub installed: InstalledPackages,
    pub locations: Locations,
    pub locks: Locks,
    hive: Arc<dyn RegistryHive>,
    probe: Arc<dyn SystemProbe>,
    third_party: Vec<Box<dyn ThirdPartyPM>>,
    search: Mutex<Option<SearchIndex>>,
}

impl PackageManager {
    /// Open the catalogue at the standard location
    pub fn open(
        locations: Locations,
        hive: Arc<dyn RegistryHive>,
        probe: Arc<dyn SystemProbe>,
    ) -> Result<Self> {
        let catalog = Catalog::open(&locations.db_path())?;
        Ok(Self::assemble(catalog, locations, hive, probe))
    }

    /// Build a manager around an existing catalogue; used by tests
    pub fn with_catalog(
        catalog: Catalog,
        locations: Locations,
        hive: Arc<dyn RegistryHive>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        Self::assemble(catalog, locations, hive, probe)
    }

    fn assemble(
        catalog: Catalog,
        locations: Locations,
        hive: Arc<dyn RegistryHive>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        Self {
            catalog,
            installed: InstalledPackages::new(),
            locations,
            locks: Locks::new(),
            hive,
            probe,
            third_party: Vec::new(),
            search: Mutex::new(None),
        }
    }

    pub fn add_third_party(&mut self, pm: Box<dyn ThirdPartyPM>) {
        self.third_party.push(pm);
    }

    pub fn hive(&self) -> &dyn RegistryHive {
        self.hive.as_ref()
    }

    fn detection_context(&self) -> DetectionContext<'_> {
        DetectionContext {
            catalog: &self.catalog,
            installed: &self.installed,
            hive: self.hive.as_ref(),
            probe: self.probe.as_ref(),
            locations: &self.locations,
            third_party: &self.third_party,
        }
    }

    /// Full refresh: load the remote repositories, rebuild the catalogue,
    /// run detection, sync status columns and bring the search index up to
    /// date
    pub fn refresh(&self, job: &mut Job) -> Result<()> {
        job.set_hint("Downloading the remote repositories");
        let mut sub = job.sub_job(0.5);
        let loaded = loader::load(self.hive.as_ref(), &mut sub)?;

        job.check_cancelled()?;
        job.set_hint("Filling the local database");
        self.catalog.clear()?;
        self.catalog.save_all(
            &loaded.repository.packages,
            &loaded.repository.versions,
            &loaded.repository.licenses,
            false,
        )?;
        self.catalog.set_repositories(&loaded.urls)?;
        job.set_progress(0.6);

        job.set_hint("Refreshing the installation status");
        let mut sub = job.sub_job(0.2);
        detection::refresh(&self.detection_context(), &mut sub)?;
        self.installed.save(self.hive.as_ref())?;
        self.installed.mark_missing_dependencies(&self.catalog)?;

        job.check_cancelled()?;
        job.set_hint("Updating the status for installed packages");
        self.catalog.update_status_for_installed(&self.installed)?;
        self.catalog.remove_orphan_packages()?;
        job.set_progress(0.85);

        job.set_hint("Updating the search index");
        let mut sub = job.sub_job(0.15);
        self.refresh_index(&loaded.key, &mut sub)?;

        job.complete();
        info!("Refresh complete");
        Ok(())
    }

    /// Reopen the index when the aggregate key matches the stored one,
    /// rebuild it otherwise
    fn refresh_index(&self, key: &str, job: &mut Job) -> Result<()> {
        // release the writer lock of a previously loaded index
        *self.search.lock().unwrap() = None;

        let stored = self.hive.get_string(INDEX_KEY, "SHA1", false)?;
        let dir = &self.locations.index_dir;

        let reusable = stored.as_deref() == Some(key) && dir.is_dir();
        let index = if reusable {
            match SearchIndex::open(dir) {
                Ok(index) => {
                    job.complete();
                    index
                }
                Err(e) => {
                    warn!("Cannot reopen the search index, rebuilding: {}", e);
                    SearchIndex::rebuild(dir, &self.catalog, &self.installed, job)?
                }
            }
        } else {
            let index = SearchIndex::rebuild(dir, &self.catalog, &self.installed, job)?;
            self.hive.set_string(INDEX_KEY, "SHA1", key)?;
            index
        };

        *self.search.lock().unwrap() = Some(index);
        Ok(())
    }

    /// Keyword search
    ///
    /// Uses the full-text index when it is loaded and falls back to the
    /// catalogue's LIKE search otherwise.
    pub fn search(&self, query: &str, filter: SearchFilter) -> Result<Vec<Package>> {
        let names = {
            let search = self.search.lock().unwrap();
            match search.as_ref() {
                Some(index) => Some(index.search(query, filter)?),
                None => None,
            }
        };

        match names {
            Some(names) => {
                let mut packages = Vec::new();
                for name in names {
                    if let Some(p) = self.catalog.find_package(&name)? {
                        packages.push(p);
                    }
                }
                Ok(packages)
            }
            None => {
                let status = match filter {
                    SearchFilter::All => None,
                    SearchFilter::Installed => Some(PackageStatus::Installed),
                    SearchFilter::Updateable => Some(PackageStatus::Updateable),
                };
                self.catalog.find_packages(
                    status,
                    query,
                    CategoryFilter::Any,
                    CategoryFilter::Any,
                )
            }
        }
    }

    /// Plan updating the given packages to their newest versions
    pub fn plan_updates(&self, packages: &[String]) -> Result<Vec<InstallOperation>> {
        planner::plan_updates(&self.catalog, &self.installed, packages)
    }

    /// Fast path lookup of an installation directory
    pub fn find_path(&self, dep: &Dependency) -> Result<Option<PathBuf>> {
        InstalledPackages::find_path(self.hive.as_ref(), dep)
    }

    /// Export the catalogue as a repository XML document
    pub fn export(&self, path: &std::path::Path) -> Result<()> {
        let mut repository = Repository::new();
        for p in self.catalog.find_packages(
            None,
            "",
            CategoryFilter::Any,
            CategoryFilter::Any,
        )? {
            for pv in self.catalog.get_package_versions(&p.name)? {
                repository.add_package_version(pv);
            }
            repository.add_package(p);
        }
        repository.write_to(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryHive;
    use crate::system::MockProbe;
    use crate::version::Version;

    fn manager() -> (PackageManager, tempfile::TempDir) {
        let scratch = tempfile::tempdir().unwrap();
        let mut probe = MockProbe::new();
        probe.windows_dir = scratch.path().join("windows");
        std::fs::create_dir_all(&probe.windows_dir).unwrap();

        let manager = PackageManager::with_catalog(
            Catalog::open_in_memory().unwrap(),
            Locations::under(scratch.path()),
            Arc::new(MemoryHive::new()),
            Arc::new(probe),
        );
        (manager, scratch)
    }

    fn write_repository(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("rep.xml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_refresh_fills_catalog_and_index() {
        let (manager, scratch) = manager();
        let url = write_repository(
            scratch.path(),
            r#"<root>
                <package name="a.b.Foo"><title>Foo</title></package>
                <version name="1.0" package="a.b.Foo"><url>https://example.com/foo.zip</url></version>
            </root>"#,
        );
        loader::set_repository_urls(manager.hive(), &[url]).unwrap();

        manager.refresh(&mut Job::new()).unwrap();

        let found = manager.search("foo", SearchFilter::All).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a.b.Foo");
        assert_eq!(found[0].status, PackageStatus::NotInstalled);

        // the index key is recorded for reuse
        assert!(manager
            .hive()
            .get_string(INDEX_KEY, "SHA1", false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_refresh_drops_versionless_packages() {
        let (manager, scratch) = manager();
        let url = write_repository(
            scratch.path(),
            "<root><package name=\"a.b.NoVersions\"><title>Empty</title></package></root>",
        );
        loader::set_repository_urls(manager.hive(), &[url]).unwrap();

        manager.refresh(&mut Job::new()).unwrap();

        assert!(manager
            .catalog
            .find_package("a.b.NoVersions")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_export_round_trip() {
        let (manager, scratch) = manager();
        let url = write_repository(
            scratch.path(),
            r#"<root>
                <package name="a.b.Foo"><title>Foo</title></package>
                <version name="1.0" package="a.b.Foo"><url>https://example.com/foo.zip</url></version>
            </root>"#,
        );
        loader::set_repository_urls(manager.hive(), &[url]).unwrap();
        manager.refresh(&mut Job::new()).unwrap();

        let out = scratch.path().join("export.xml");
        manager.export(&out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("a.b.Foo"));
        assert!(text.contains("spec-version"));
    }

    #[test]
    fn test_third_party_detection_runs_during_refresh() {
        use crate::detection::third_party::{
            DetectedInstallation, ThirdPartyDetection, ThirdPartyPM,
        };
        use crate::model::InstalledPackageVersion;

        struct FakePM;

        impl ThirdPartyPM for FakePM {
            fn detect(&self) -> crate::error::Result<ThirdPartyDetection> {
                Ok(ThirdPartyDetection {
                    prefix: "fake:".to_string(),
                    found: vec![DetectedInstallation {
                        record: InstalledPackageVersion::new(
                            "a.b.External",
                            Version::parse("3.1").unwrap(),
                        ),
                        uninstall_script: None,
                    }],
                })
            }
        }

        let (mut manager, scratch) = manager();
        manager.add_third_party(Box::new(FakePM));
        let url = write_repository(scratch.path(), "<root/>");
        loader::set_repository_urls(manager.hive(), &[url]).unwrap();

        manager.refresh(&mut Job::new()).unwrap();

        let record = manager
            .installed
            .find("a.b.External", &Version::parse("3.1").unwrap())
            .unwrap();
        assert!(record.external);
        assert_eq!(record.detection_info.as_deref(), Some("fake:a.b.External-3.1"));
        // the synthesised directory lives under NpackdDetected
        assert!(record
            .directory
            .unwrap()
            .starts_with(manager.locations.detected_dir()));
        // and the catalogue now knows the package
        assert_eq!(
            manager
                .catalog
                .find_package("a.b.External")
                .unwrap()
                .unwrap()
                .status,
            PackageStatus::Installed
        );
    }

    #[test]
    fn test_detected_install_updates_status() {
        let (manager, scratch) = manager();
        let app_dir = scratch.path().join("foo-install");
        std::fs::create_dir_all(&app_dir).unwrap();

        let url = write_repository(
            scratch.path(),
            r#"<root>
                <package name="a.b.Foo"><title>Foo</title></package>
                <version name="1.0" package="a.b.Foo"><url>https://example.com/foo.zip</url></version>
            </root>"#,
        );
        loader::set_repository_urls(manager.hive(), &[url]).unwrap();

        // a record in the registry marks 1.0 as installed
        manager
            .installed
            .set_package_version_path(
                manager.hive(),
                "a.b.Foo",
                &Version::parse("1.0").unwrap(),
                &app_dir,
                true,
            )
            .unwrap();

        manager.refresh(&mut Job::new()).unwrap();

        let p = manager.catalog.find_package("a.b.Foo").unwrap().unwrap();
        assert_eq!(p.status, PackageStatus::Installed);
    }
}
