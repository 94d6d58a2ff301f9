// src/commands.rs

//! CLI command implementations

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use npackd::repository::loader;
use npackd::{
    Dependency, Job, JobEvent, Locations, PackageManager, PackageStatus, SearchFilter,
};
use std::path::Path;
use std::sync::Arc;

/// Build the package manager for the running system
pub fn build_manager() -> Result<PackageManager> {
    let locations = Locations::discover();

    #[cfg(windows)]
    let manager = PackageManager::open(
        locations,
        Arc::new(npackd::registry::MachineHive::new()),
        Arc::new(npackd::system::NativeProbe::new()),
    )?;

    #[cfg(not(windows))]
    let manager = {
        tracing::warn!("Not running on Windows: registry state is not persisted");
        PackageManager::open(
            locations,
            Arc::new(npackd::registry::MemoryHive::new()),
            Arc::new(npackd::system::MockProbe::new()),
        )?
    };

    Ok(manager)
}

/// A job that renders its progress with an indicatif bar
fn progress_job() -> Job {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {percent:>3}% {msg}")
            .expect("static template"),
    );
    Job::with_observer(move |event| match event {
        JobEvent::Hint(hint) => bar.set_message(hint),
        JobEvent::Progress(p) => bar.set_position((p * 100.0) as u64),
    })
}

/// Reload all repositories, run detection and update the search index
pub fn cmd_refresh() -> Result<()> {
    let manager = build_manager()?;
    let mut job = progress_job();
    manager.refresh(&mut job)?;
    println!("Refresh complete");
    Ok(())
}

/// Search the catalogue
pub fn cmd_search(keywords: &[String], installed: bool, updateable: bool) -> Result<()> {
    let manager = build_manager()?;
    let filter = if updateable {
        SearchFilter::Updateable
    } else if installed {
        SearchFilter::Installed
    } else {
        SearchFilter::All
    };

    let query = keywords.join(" ");
    let packages = manager.search(&query, filter)?;
    if packages.is_empty() {
        println!("No packages found");
        return Ok(());
    }

    for p in packages {
        let status = match p.status {
            PackageStatus::NotInstalled => "",
            PackageStatus::Installed => " [installed]",
            PackageStatus::Updateable => " [updateable]",
        };
        println!("{} - {}{}", p.name, p.title, status);
    }
    Ok(())
}

/// Resolve a possibly abbreviated package name to its full name
fn resolve_package_name(manager: &PackageManager, name: &str) -> Result<String> {
    if manager.catalog.find_package(name)?.is_some() {
        return Ok(name.to_string());
    }
    let matches = manager.catalog.find_packages_by_short_name(name)?;
    match matches.len() {
        0 => Ok(name.to_string()),
        1 => Ok(matches[0].name.clone()),
        _ => anyhow::bail!(
            "The package name {} is ambiguous: {}",
            name,
            matches
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Print the installation directory of a package version in a range
pub fn cmd_path(package: &str, versions: &str) -> Result<()> {
    let manager = build_manager()?;
    let package = resolve_package_name(&manager, package)?;
    let dep = Dependency::parse_versions(&package, versions)?;
    match manager.find_path(&dep)? {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => Err(npackd::Error::NoInstalled(package).into()),
    }
}

/// Show the operations an update of the given packages would run
pub fn cmd_plan_update(packages: &[String]) -> Result<()> {
    let manager = build_manager()?;
    let mut job = progress_job();
    manager.refresh(&mut job)?;

    let packages = packages
        .iter()
        .map(|name| resolve_package_name(&manager, name))
        .collect::<Result<Vec<_>>>()?;
    let ops = manager.plan_updates(&packages)?;
    if ops.is_empty() {
        println!("Nothing to do");
        return Ok(());
    }
    for op in &ops {
        println!("{}", op);
    }
    Ok(())
}

/// Add a repository URL
pub fn cmd_repo_add(url: &str) -> Result<()> {
    let manager = build_manager()?;
    let mut urls = loader::get_repository_urls(manager.hive())?;
    if urls.iter().any(|u| u == url) {
        println!("Repository already registered: {}", url);
        return Ok(());
    }
    urls.push(url.to_string());
    loader::set_repository_urls(manager.hive(), &urls)?;
    println!("Added repository {}", url);
    Ok(())
}

/// List the configured repository URLs
pub fn cmd_repo_list() -> Result<()> {
    let manager = build_manager()?;
    let urls = loader::get_repository_urls(manager.hive())?;
    if urls.is_empty() {
        println!("No repositories defined");
    }
    for (i, url) in urls.iter().enumerate() {
        println!("{}: {}", i, url);
    }
    Ok(())
}

/// Remove a repository URL
pub fn cmd_repo_remove(url: &str) -> Result<()> {
    let manager = build_manager()?;
    let mut urls = loader::get_repository_urls(manager.hive())?;
    let before = urls.len();
    urls.retain(|u| u != url);
    if urls.len() == before {
        println!("Repository not registered: {}", url);
        return Ok(());
    }
    loader::set_repository_urls(manager.hive(), &urls)?;
    println!("Removed repository {}", url);
    Ok(())
}

/// Export the catalogue as a repository XML file
pub fn cmd_export(file: &Path) -> Result<()> {
    let manager = build_manager()?;
    manager
        .export(file)
        .with_context(|| format!("Cannot export to {}", file.display()))?;
    println!("Exported to {}", file.display());
    Ok(())
}
