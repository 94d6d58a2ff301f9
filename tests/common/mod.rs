// tests/common/mod.rs

//! Shared test environment for integration tests.

use npackd::registry::MemoryHive;
use npackd::repository::loader;
use npackd::system::MockProbe;
use npackd::{Locations, PackageManager};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A package manager wired to in-memory Windows state under a scratch
/// directory. Keep the TempDir alive to prevent cleanup.
pub struct TestEnv {
    pub manager: PackageManager,
    pub scratch: TempDir,
    repositories: Vec<String>,
}

impl TestEnv {
    pub fn new() -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let mut probe = MockProbe::new();
        probe.windows_dir = scratch.path().join("windows");
        std::fs::create_dir_all(&probe.windows_dir).unwrap();

        let manager = PackageManager::open(
            Locations::under(scratch.path()),
            Arc::new(MemoryHive::new()),
            Arc::new(probe),
        )
        .unwrap();

        Self {
            manager,
            scratch,
            repositories: Vec::new(),
        }
    }

    /// Write a repository document and register its URL
    pub fn add_repository(&mut self, name: &str, xml: &str) -> PathBuf {
        let path = self.scratch.path().join(name);
        std::fs::write(&path, xml).unwrap();
        self.repositories.push(path.to_string_lossy().to_string());
        loader::set_repository_urls(self.manager.hive(), &self.repositories).unwrap();
        path
    }

    /// Overwrite a previously added repository document
    pub fn update_repository(&self, name: &str, xml: &str) {
        std::fs::write(self.scratch.path().join(name), xml).unwrap();
    }

    /// Create a directory usable as an installation target
    pub fn install_dir(&self, name: &str) -> PathBuf {
        let dir = self.scratch.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
