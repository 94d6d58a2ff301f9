// src/planner/mod.rs

//! Update planning
//!
//! `plan_updates` turns "update these packages to their newest versions"
//! into an ordered list of install/uninstall operations honouring the
//! dependency graph. Planning works against a copy of the installed set
//! and never mutates real state.
//!
//! Many packages cannot be installed side by side: the new version would
//! overwrite the old version's shortcuts. The planner therefore first
//! tries, per package, the reversed pair "uninstall old, install new"; the
//! pair is only accepted when it causes no collateral operations.
//! Remaining targets get all installs planned first and all uninstalls
//! after.

use crate::db::Catalog;
use crate::error::{Error, Result};
use crate::installed::InstalledPackages;
use crate::model::{simplify, Dependency, InstallOperation, PackageVersion};
use crate::version::Version;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

// ----------------------------------------------------------------------
// Advisory locks
// ----------------------------------------------------------------------

/// Process-wide advisory locks, one per package version
///
/// The executor takes every operation's lock up front, runs the plan and
/// releases them on completion or failure. The UI uses `find_locked` for
/// feedback about in-flight operations.
#[derive(Default)]
pub struct Locks {
    held: Mutex<BTreeMap<String, (String, Version)>>,
}

impl Locks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, package: &str, version: &Version) -> Result<()> {
        let key = format!("{}-{}", package, version.normalize());
        let mut held = self.held.lock().unwrap();
        if held.contains_key(&key) {
            return Err(Error::LockedByOtherOperation(format!(
                "{} {}",
                package, version
            )));
        }
        held.insert(key, (package.to_string(), version.clone()));
        Ok(())
    }

    pub fn unlock(&self, package: &str, version: &Version) {
        let key = format!("{}-{}", package, version.normalize());
        self.held.lock().unwrap().remove(&key);
    }

    pub fn is_locked(&self, package: &str, version: &Version) -> bool {
        let key = format!("{}-{}", package, version.normalize());
        self.held.lock().unwrap().contains_key(&key)
    }

    /// The first locked package version, if any
    pub fn find_locked(&self) -> Option<(String, Version)> {
        self.held.lock().unwrap().values().next().cloned()
    }

    /// Acquire all locks of a plan up front; on conflict nothing stays
    /// locked
    pub fn lock_all(&self, ops: &[InstallOperation]) -> Result<()> {
        let mut acquired = Vec::new();
        for op in ops {
            if let Err(e) = self.lock(&op.package, &op.version) {
                for (package, version) in acquired {
                    self.unlock(package, version);
                }
                return Err(e);
            }
            acquired.push((&op.package, &op.version));
        }
        Ok(())
    }

    pub fn unlock_all(&self, ops: &[InstallOperation]) {
        for op in ops {
            self.unlock(&op.package, &op.version);
        }
    }
}

// ----------------------------------------------------------------------
// Working set
// ----------------------------------------------------------------------

/// A mutable copy of the installed set used during planning
#[derive(Debug, Clone, Default)]
struct WorkingSet {
    entries: Vec<(String, Version)>,
}

impl WorkingSet {
    fn from_installed(installed: &InstalledPackages) -> Self {
        Self {
            entries: installed
                .get_all()
                .into_iter()
                .map(|ipv| (ipv.package, ipv.version))
                .collect(),
        }
    }

    fn contains(&self, package: &str, version: &Version) -> bool {
        self.entries.iter().any(|(p, v)| {
            p == package && v.compare(version) == std::cmp::Ordering::Equal
        })
    }

    fn satisfies(&self, dep: &Dependency) -> bool {
        self.entries
            .iter()
            .any(|(p, v)| *p == dep.package && dep.matches(v))
    }

    fn add(&mut self, package: &str, version: &Version) {
        if !self.contains(package, version) {
            self.entries.push((package.to_string(), version.clone()));
        }
    }

    fn remove(&mut self, package: &str, version: &Version) {
        self.entries.retain(|(p, v)| {
            !(p == package && v.compare(version) == std::cmp::Ordering::Equal)
        });
    }
}

// ----------------------------------------------------------------------
// Planning primitives
// ----------------------------------------------------------------------

/// Newest installable version of a package, optionally restricted to a
/// dependency range
fn newest_installable(
    catalog: &Catalog,
    package: &str,
    range: Option<&Dependency>,
) -> Result<Option<PackageVersion>> {
    // versions come back newest first
    for pv in catalog.get_package_versions(package)? {
        if !pv.installable() {
            continue;
        }
        if let Some(dep) = range {
            if !dep.matches(&pv.version) {
                continue;
            }
        }
        return Ok(Some(pv));
    }
    Ok(None)
}

/// Plan the installation of one version, recursively installing
/// unsatisfied dependencies first
fn plan_installation(
    catalog: &Catalog,
    working: &mut WorkingSet,
    pv: &PackageVersion,
    ops: &mut Vec<InstallOperation>,
    avoid: &mut Vec<String>,
) -> Result<()> {
    if working.contains(&pv.package, &pv.version) {
        return Ok(());
    }

    let key = format!("{}-{}", pv.package, pv.version.normalize());
    if avoid.contains(&key) {
        return Err(Error::DependencyUnresolved(format!(
            "Cyclic dependency on {}",
            pv.package
        )));
    }
    avoid.push(key);

    for dep in &pv.dependencies {
        if working.satisfies(dep) {
            continue;
        }
        let best = newest_installable(catalog, &dep.package, Some(dep))?
            .ok_or_else(|| Error::DependencyUnresolved(dep.to_string()))?;
        plan_installation(catalog, working, &best, ops, avoid)?;
    }

    working.add(&pv.package, &pv.version);
    ops.push(InstallOperation::install(&pv.package, pv.version.clone()));
    Ok(())
}

/// Plan the uninstallation of one version; versions whose dependencies
/// would break are uninstalled first
fn plan_uninstallation(
    catalog: &Catalog,
    working: &mut WorkingSet,
    package: &str,
    version: &Version,
    ops: &mut Vec<InstallOperation>,
) -> Result<()> {
    if !working.contains(package, version) {
        return Ok(());
    }
    working.remove(package, version);

    // dependents first, so every operation runs against a consistent set
    let snapshot = working.entries.clone();
    for (p, v) in snapshot {
        let Some(pv) = catalog.find_package_version(&p, &v)? else {
            continue;
        };
        let broken = pv.dependencies.iter().any(|dep| {
            dep.package == package && dep.matches(version) && !working.satisfies(dep)
        });
        if broken {
            plan_uninstallation(catalog, working, &p, &v, ops)?;
        }
    }

    ops.push(InstallOperation::uninstall(package, version.clone()));
    Ok(())
}

// ----------------------------------------------------------------------
// Update planning
// ----------------------------------------------------------------------

/// Plan updating the given packages to their newest installable versions
pub fn plan_updates(
    catalog: &Catalog,
    installed: &InstalledPackages,
    packages: &[String],
) -> Result<Vec<InstallOperation>> {
    let mut working = WorkingSet::from_installed(installed);

    let mut newest = Vec::new();
    let mut current = Vec::new();
    for package in packages {
        let a = newest_installable(catalog, package, None)?
            .ok_or_else(|| Error::NoInstallable(package.clone()))?;
        let b = installed
            .get_newest_installed(package)
            .ok_or_else(|| Error::NoInstalled(package.clone()))?;

        if a.version.compare(&b.version) != std::cmp::Ordering::Greater {
            return Err(Error::AlreadyNewest {
                package: package.clone(),
                version: b.version.to_string(),
            });
        }
        newest.push(a);
        current.push(b);
    }

    let mut ops = Vec::new();
    let mut used = vec![false; newest.len()];

    // phase 1: per-package "uninstall old, install new" pairs, accepted
    // only without collateral operations
    for i in 0..newest.len() {
        let mut tentative_working = working.clone();
        let mut tentative_ops = Vec::new();

        let planned = plan_uninstallation(
            catalog,
            &mut tentative_working,
            &current[i].package,
            &current[i].version,
            &mut tentative_ops,
        )
        .and_then(|_| {
            let mut avoid = Vec::new();
            plan_installation(
                catalog,
                &mut tentative_working,
                &newest[i],
                &mut tentative_ops,
                &mut avoid,
            )
        });

        if planned.is_ok() && tentative_ops.len() == 2 {
            debug!(
                "Planned paired replacement for {}: {} -> {}",
                newest[i].package, current[i].version, newest[i].version
            );
            used[i] = true;
            working = tentative_working;
            ops.append(&mut tentative_ops);
        }
    }

    // phase 2: remaining targets install first, uninstall after
    for (i, pv) in newest.iter().enumerate() {
        if !used[i] {
            let mut avoid = Vec::new();
            plan_installation(catalog, &mut working, pv, &mut ops, &mut avoid)?;
        }
    }
    for (i, ipv) in current.iter().enumerate() {
        if !used[i] {
            plan_uninstallation(catalog, &mut working, &ipv.package, &ipv.version, &mut ops)?;
        }
    }

    // phase 3
    simplify(&mut ops);
    Ok(ops)
}
