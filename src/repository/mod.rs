// src/repository/mod.rs

//! In-memory repository: the merge target for remote loads
//!
//! The loader fills one `Repository` from all configured repository URLs;
//! the result is then saved into the catalogue in a single transaction.
//! Within one load the first occurrence of a license, package or package
//! version wins and later duplicates are discarded silently.

pub mod loader;
pub mod xml;

use crate::error::{Error, Result};
use crate::model::{License, Package, PackageVersion};
use crate::version::Version;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

#[derive(Default, Debug)]
pub struct Repository {
    pub packages: Vec<Package>,
    pub versions: Vec<PackageVersion>,
    pub licenses: Vec<License>,
    package_names: HashSet<String>,
    license_names: HashSet<String>,
    version_keys: HashSet<(String, String)>,
    versions_by_package: HashMap<String, Vec<usize>>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package unless one with the same name exists
    pub fn add_package(&mut self, p: Package) {
        if self.package_names.insert(p.name.clone()) {
            self.packages.push(p);
        }
    }

    /// Add a license unless one with the same name exists
    pub fn add_license(&mut self, l: License) {
        if self.license_names.insert(l.name.clone()) {
            self.licenses.push(l);
        }
    }

    /// Add a package version unless the (package, version) pair exists
    pub fn add_package_version(&mut self, pv: PackageVersion) {
        let key = (pv.package.clone(), pv.version.normalize().to_string());
        if self.version_keys.insert(key) {
            self.versions_by_package
                .entry(pv.package.clone())
                .or_default()
                .push(self.versions.len());
            self.versions.push(pv);
        }
    }

    pub fn find_package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn find_license(&self, name: &str) -> Option<&License> {
        self.licenses.iter().find(|l| l.name == name)
    }

    pub fn find_package_version(
        &self,
        package: &str,
        version: &Version,
    ) -> Option<&PackageVersion> {
        self.versions_by_package.get(package).and_then(|indexes| {
            indexes
                .iter()
                .map(|&i| &self.versions[i])
                .find(|pv| pv.version.compare(version) == std::cmp::Ordering::Equal)
        })
    }

    /// All versions of a package, oldest first
    pub fn get_package_versions(&self, package: &str) -> Vec<&PackageVersion> {
        let mut versions: Vec<&PackageVersion> = self
            .versions_by_package
            .get(package)
            .map(|indexes| indexes.iter().map(|&i| &self.versions[i]).collect())
            .unwrap_or_default();
        versions.sort_by(|a, b| a.version.compare(&b.version));
        versions
    }

    /// Find the version for (package, version), creating the version (and
    /// the package, with the name as its title) if missing. Detectors use
    /// this to register software the catalogue does not know about.
    pub fn find_or_create_package_version(
        &mut self,
        package: &str,
        version: &Version,
    ) -> Result<&PackageVersion> {
        if self.find_package_version(package, version).is_none() {
            if self.find_package(package).is_none() {
                self.add_package(Package::new(package, package));
            }
            self.add_package_version(PackageVersion::new(package, version.normalize()));
        }
        self.find_package_version(package, version)
            .ok_or_else(|| Error::Internal("Version vanished after insert".to_string()))
    }

    /// Merge one parsed repository document: licenses first, then
    /// packages, then versions; duplicates are dropped
    pub fn merge(&mut self, parsed: xml::ParsedRepository) {
        for l in parsed.licenses {
            self.add_license(l);
        }
        for p in parsed.packages {
            self.add_package(p);
        }
        for pv in parsed.versions {
            self.add_package_version(pv);
        }
    }

    /// Ensure the detection targets exist even with an empty remote
    /// catalogue
    pub fn add_well_known_packages(&mut self) {
        for (name, title, url, description) in WELL_KNOWN_PACKAGES {
            if self.find_package(name).is_none() {
                let mut p = Package::new(*name, *title);
                p.url = url.to_string();
                p.description = description.to_string();
                self.add_package(p);
            }
        }
    }

    /// Write the repository as an XML document
    pub fn write_to(&self, path: &Path) -> Result<()> {
        use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
        use quick_xml::Writer;

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);

        let start = |w: &mut Writer<Vec<u8>>, name: &str| {
            let _ = w.write_event(Event::Start(BytesStart::new(name)));
        };
        let end = |w: &mut Writer<Vec<u8>>, name: &str| {
            let _ = w.write_event(Event::End(BytesEnd::new(name)));
        };
        let text = |w: &mut Writer<Vec<u8>>, value: &str| {
            let _ = w.write_event(Event::Text(BytesText::new(value)));
        };

        start(&mut writer, "root");
        start(&mut writer, "spec-version");
        text(&mut writer, "3");
        end(&mut writer, "spec-version");

        for p in &self.packages {
            let mut e = BytesStart::new("package");
            e.push_attribute(("name", p.name.as_str()));
            let _ = writer.write_event(Event::Start(e));
            start(&mut writer, "title");
            text(&mut writer, &p.title);
            end(&mut writer, "title");
            if !p.description.is_empty() {
                start(&mut writer, "description");
                text(&mut writer, &p.description);
                end(&mut writer, "description");
            }
            end(&mut writer, "package");
        }

        for pv in &self.versions {
            let mut e = BytesStart::new("version");
            e.push_attribute(("name", pv.version.to_string().as_str()));
            e.push_attribute(("package", pv.package.as_str()));
            if let Some(url) = &pv.download {
                let _ = writer.write_event(Event::Start(e));
                start(&mut writer, "url");
                text(&mut writer, url);
                end(&mut writer, "url");
                end(&mut writer, "version");
            } else {
                let _ = writer.write_event(Event::Empty(e));
            }
        }

        end(&mut writer, "root");

        let mut file = std::fs::File::create(path).map_err(|e| {
            Error::Filesystem(format!(
                "Cannot open {} for writing: {}",
                path.display(),
                e
            ))
        })?;
        file.write_all(&writer.into_inner())?;
        Ok(())
    }
}

/// Packages that must exist before any detection pass runs
const WELL_KNOWN_PACKAGES: &[(&str, &str, &str, &str)] = &[
    (
        "com.microsoft.Windows",
        "Windows",
        "http://www.microsoft.com/windows/",
        "Operating system",
    ),
    (
        "com.microsoft.Windows32",
        "Windows/32 bit",
        "http://www.microsoft.com/windows/",
        "Operating system",
    ),
    (
        "com.microsoft.Windows64",
        "Windows/64 bit",
        "http://www.microsoft.com/windows/",
        "Operating system",
    ),
    (
        "com.googlecode.windows-package-manager.Npackd",
        "Npackd",
        "http://code.google.com/p/windows-package-manager/",
        "package manager",
    ),
    (
        "com.oracle.JRE",
        "JRE",
        "http://www.java.com/",
        "Java runtime",
    ),
    (
        "com.oracle.JRE64",
        "JRE/64 bit",
        "http://www.java.com/",
        "Java runtime",
    ),
    (
        "com.oracle.JDK",
        "JDK",
        "http://www.oracle.com/technetwork/java/javase/overview/index.html",
        "Java development kit",
    ),
    (
        "com.oracle.JDK64",
        "JDK/64 bit",
        "http://www.oracle.com/technetwork/java/javase/overview/index.html",
        "Java development kit",
    ),
    (
        "com.microsoft.DotNetRedistributable",
        ".NET redistributable runtime",
        "http://msdn.microsoft.com/en-us/netframework/default.aspx",
        ".NET runtime",
    ),
    (
        "com.microsoft.WindowsInstaller",
        "Windows Installer",
        "http://msdn.microsoft.com/en-us/library/cc185688(VS.85).aspx",
        "Package manager",
    ),
    (
        "com.microsoft.MSXML",
        "Microsoft Core XML Services (MSXML)",
        "http://www.microsoft.com/downloads/en/details.aspx?FamilyID=993c0bcf-3bcf-4009-be21-27e85e1857b1#Overview",
        "XML library",
    ),
];
