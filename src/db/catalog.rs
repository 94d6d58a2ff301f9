// src/db/catalog.rs

//! The local package catalogue
//!
//! An SQLite database holding packages, package versions (with their XML
//! payloads), licenses and the category tree. This is the single source of
//! truth for what is available; what is installed lives in
//! `InstalledPackages`.
//!
//! The connection is guarded by a mutex: refresh and save serialize on it,
//! and SQLite's single-writer discipline is respected. Lookup methods
//! return owned values; the license cache shares entries through `Arc` and
//! is invalidated by `clear()`.

use crate::error::{Error, Result};
use crate::installed::InstalledPackages;
use crate::model::{License, Package, PackageStatus, PackageVersion};
use crate::repository::xml;
use crate::version::Version;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Filter on one category level of a package query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Do not filter on this level
    Any,
    /// Match packages with no category at this level
    Unset,
    /// Match a specific category id
    Id(i64),
}

/// One row of a category aggregation query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub id: Option<i64>,
    pub count: i64,
    pub name: Option<String>,
}

/// SQLite-backed catalogue store
pub struct Catalog {
    conn: Mutex<Connection>,
    licenses: RwLock<HashMap<String, Arc<License>>>,
}

impl Catalog {
    /// Open the catalogue, creating the file and schema if necessary
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::DbOpen(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path).map_err(|e| Error::DbOpen(e.to_string()))?;
        Self::init(conn)
    }

    /// Open a private in-memory catalogue; used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::DbOpen(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::DbOpen(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| Error::DbOpen(e.to_string()))?;
        super::schema::create(&conn).map_err(|e| Error::DbOpen(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            licenses: RwLock::new(HashMap::new()),
        })
    }

    /// Remove all packages, versions, licenses and categories
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM PACKAGE", [])?;
        tx.execute("DELETE FROM PACKAGE_VERSION", [])?;
        tx.execute("DELETE FROM LICENSE", [])?;
        tx.execute("DELETE FROM CATEGORY", [])?;
        tx.commit()?;

        self.licenses.write().unwrap().clear();
        debug!("Catalogue cleared");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    /// Insert or update a package
    ///
    /// The category path is split on "|" and interned into the CATEGORY
    /// tree level by level; the resulting ids are stored on the package
    /// row.
    pub fn save_package(&self, p: &Package, replace: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::save_package_on(&conn, p, replace)
    }

    fn save_package_on(conn: &Connection, p: &Package, replace: bool) -> Result<()> {
        let mut category_ids: [Option<i64>; 5] = [None; 5];
        if let Some(path) = p.categories.first() {
            let mut parent = 0i64;
            for (level, name) in path.split('|').map(str::trim).take(5).enumerate() {
                if name.is_empty() {
                    break;
                }
                let id = Self::intern_category(conn, parent, level as i64, name)?;
                category_ids[level] = Some(id);
                parent = id;
            }
        }

        let sql = format!(
            "INSERT OR {} INTO PACKAGE \
             (NAME, TITLE, URL, ICON, DESCRIPTION, LICENSE, FULLTEXT, STATUS, \
              SHORT_NAME, CATEGORY0, CATEGORY1, CATEGORY2, CATEGORY3, CATEGORY4) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            if replace { "REPLACE" } else { "IGNORE" }
        );
        let fulltext =
            format!("{} {} {}", p.title, p.description, p.name).to_lowercase();
        conn.execute(
            &sql,
            params![
                p.name,
                p.title,
                p.url,
                p.icon,
                p.description,
                p.license,
                fulltext,
                PackageStatus::NotInstalled.as_i64(),
                p.short_name(),
                category_ids[0],
                category_ids[1],
                category_ids[2],
                category_ids[3],
                category_ids[4],
            ],
        )?;
        Ok(())
    }

    fn intern_category(conn: &Connection, parent: i64, level: i64, name: &str) -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT ID FROM CATEGORY WHERE PARENT = ?1 AND LEVEL = ?2 AND NAME = ?3",
                params![parent, level, name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO CATEGORY (NAME, PARENT, LEVEL) VALUES (?1, ?2, ?3)",
            params![name, parent, level],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert or update a package version
    ///
    /// The version's XML payload is stored verbatim when the value came
    /// from a repository document; detected versions get a generated
    /// payload.
    pub fn save_package_version(&self, pv: &PackageVersion, replace: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::save_package_version_on(&conn, pv, replace)
    }

    fn save_package_version_on(
        conn: &Connection,
        pv: &PackageVersion,
        replace: bool,
    ) -> Result<()> {
        let content = match &pv.source_xml {
            Some(text) => text.clone(),
            None => xml::version_to_xml(pv),
        };
        let sql = format!(
            "INSERT OR {} INTO PACKAGE_VERSION \
             (NAME, PACKAGE, CONTENT, MSIGUID, DETECT_FILE_COUNT) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            if replace { "REPLACE" } else { "IGNORE" }
        );
        // the NAME column always holds the normalized version string so
        // that "1.0" and "1" address the same row
        conn.execute(
            &sql,
            params![
                pv.version.normalize().to_string(),
                pv.package,
                content.as_bytes(),
                pv.msi_guid,
                pv.detect_files.len() as i64,
            ],
        )?;
        Ok(())
    }

    /// Insert or update a license
    pub fn save_license(&self, l: &License, replace: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::save_license_on(&conn, l, replace)
    }

    fn save_license_on(conn: &Connection, l: &License, replace: bool) -> Result<()> {
        let sql = format!(
            "INSERT OR {} INTO LICENSE (NAME, TITLE, DESCRIPTION, URL) \
             VALUES (?1, ?2, ?3, ?4)",
            if replace { "REPLACE" } else { "IGNORE" }
        );
        conn.execute(&sql, params![l.name, l.title, l.description, l.url])?;
        Ok(())
    }

    /// Save a whole in-memory repository in one transaction
    pub fn save_all(
        &self,
        packages: &[Package],
        versions: &[PackageVersion],
        licenses: &[License],
        replace: bool,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for p in packages {
            Self::save_package_on(&tx, p, replace)?;
        }
        for pv in versions {
            Self::save_package_version_on(&tx, pv, replace)?;
        }
        for l in licenses {
            Self::save_license_on(&tx, l, replace)?;
        }
        tx.commit()?;

        info!(
            "Saved {} packages, {} versions, {} licenses",
            packages.len(),
            versions.len(),
            licenses.len()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    const PACKAGE_COLUMNS: &'static str = "NAME, TITLE, URL, ICON, DESCRIPTION, LICENSE, \
         STATUS, CATEGORY0, CATEGORY1, CATEGORY2, CATEGORY3, CATEGORY4";

    fn package_from_row(conn: &Connection, row: &Row) -> rusqlite::Result<Package> {
        let mut p = Package::new(
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        );
        p.url = row.get::<_, Option<String>>(2)?.unwrap_or_default();
        p.icon = row.get::<_, Option<String>>(3)?.unwrap_or_default();
        p.description = row.get::<_, Option<String>>(4)?.unwrap_or_default();
        p.license = row.get::<_, Option<String>>(5)?.unwrap_or_default();
        p.status = PackageStatus::from_i64(row.get::<_, Option<i64>>(6)?.unwrap_or(0));

        // the deepest assigned category id names the displayed category
        let mut deepest = None;
        for i in (7..12).rev() {
            if let Some(id) = row.get::<_, Option<i64>>(i)? {
                deepest = Some(id);
                break;
            }
        }
        if let Some(id) = deepest {
            if let Ok(Some(name)) = Self::category_name_on(conn, id) {
                p.categories.push(name);
            }
        }

        Ok(p)
    }

    fn category_name_on(conn: &Connection, id: i64) -> Result<Option<String>> {
        Ok(conn
            .query_row("SELECT NAME FROM CATEGORY WHERE ID = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Name of a category by id
    pub fn find_category(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Self::category_name_on(&conn, id)
    }

    /// Point lookup of a package by its full name
    pub fn find_package(&self, name: &str) -> Result<Option<Package>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM PACKAGE WHERE NAME = ?1",
            Self::PACKAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let p = stmt
            .query_row([name], |row| Self::package_from_row(&conn, row))
            .optional()?;
        Ok(p)
    }

    /// All packages whose short name matches
    pub fn find_packages_by_short_name(&self, short_name: &str) -> Result<Vec<Package>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM PACKAGE WHERE SHORT_NAME = ?1 ORDER BY NAME",
            Self::PACKAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map([short_name], |row| Self::package_from_row(&conn, row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    /// Point lookup of a package version; parses the stored XML payload
    pub fn find_package_version(
        &self,
        package: &str,
        version: &Version,
    ) -> Result<Option<PackageVersion>> {
        let conn = self.conn.lock().unwrap();
        let content: Option<Vec<u8>> = conn
            .query_row(
                "SELECT CONTENT FROM PACKAGE_VERSION WHERE PACKAGE = ?1 AND NAME = ?2",
                params![package, version.normalize().to_string()],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        match content {
            Some(blob) => Ok(Some(Self::parse_blob(&blob)?)),
            None => Ok(None),
        }
    }

    /// Find the package version carrying an MSI product code
    pub fn find_package_version_by_msi_guid(
        &self,
        guid: &str,
    ) -> Result<Option<PackageVersion>> {
        let conn = self.conn.lock().unwrap();
        let content: Option<Vec<u8>> = conn
            .query_row(
                "SELECT CONTENT FROM PACKAGE_VERSION WHERE MSIGUID = ?1",
                [guid],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        match content {
            Some(blob) => Ok(Some(Self::parse_blob(&blob)?)),
            None => Ok(None),
        }
    }

    fn parse_blob(blob: &[u8]) -> Result<PackageVersion> {
        let text = std::str::from_utf8(blob)
            .map_err(|e| Error::DbError(format!("Invalid UTF-8 in version payload: {}", e)))?;
        xml::parse_version_document(text)
    }

    /// All versions of a package, newest first
    pub fn get_package_versions(&self, package: &str) -> Result<Vec<PackageVersion>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT CONTENT FROM PACKAGE_VERSION WHERE PACKAGE = ?1")?;
        let blobs = stmt
            .query_map([package], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut versions = blobs
            .iter()
            .map(|b| Self::parse_blob(b))
            .collect::<Result<Vec<_>>>()?;
        versions.sort_by(|a, b| b.version.compare(&a.version));
        Ok(versions)
    }

    /// All versions that carry at least one detect file
    pub fn get_package_versions_with_detect_files(&self) -> Result<Vec<PackageVersion>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT CONTENT FROM PACKAGE_VERSION WHERE DETECT_FILE_COUNT > 0")?;
        let blobs = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        blobs.iter().map(|b| Self::parse_blob(b)).collect()
    }

    /// Look up a license; entries are cached until `clear()`
    pub fn find_license(&self, name: &str) -> Result<Option<Arc<License>>> {
        if let Some(cached) = self.licenses.read().unwrap().get(name) {
            return Ok(Some(Arc::clone(cached)));
        }

        let conn = self.conn.lock().unwrap();
        let license = conn
            .query_row(
                "SELECT NAME, TITLE, DESCRIPTION, URL FROM LICENSE WHERE NAME = ?1",
                [name],
                |row| {
                    let mut l = License::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    );
                    l.description = row.get::<_, Option<String>>(2)?.unwrap_or_default();
                    l.url = row.get::<_, Option<String>>(3)?.unwrap_or_default();
                    Ok(l)
                },
            )
            .optional()?;
        drop(conn);

        match license {
            Some(l) => {
                let l = Arc::new(l);
                self.licenses
                    .write()
                    .unwrap()
                    .insert(name.to_string(), Arc::clone(&l));
                Ok(Some(l))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    fn build_filter(
        status: Option<PackageStatus>,
        query: &str,
        cat0: CategoryFilter,
        cat1: CategoryFilter,
    ) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for keyword in query.to_lowercase().split_whitespace() {
            clauses.push("FULLTEXT LIKE ?".to_string());
            params.push(Value::Text(format!("%{}%", keyword)));
        }

        if let Some(status) = status {
            if status == PackageStatus::Installed {
                clauses.push("STATUS >= ?".to_string());
            } else {
                clauses.push("STATUS = ?".to_string());
            }
            params.push(Value::Integer(status.as_i64()));
        }

        for (column, filter) in [("CATEGORY0", cat0), ("CATEGORY1", cat1)] {
            match filter {
                CategoryFilter::Any => {}
                CategoryFilter::Unset => {
                    clauses.push(format!("{} IS NULL", column));
                }
                CategoryFilter::Id(id) => {
                    clauses.push(format!("{} = ?", column));
                    params.push(Value::Integer(id));
                }
            }
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        (where_clause, params)
    }

    /// Keyword search over the precomputed full-text column
    ///
    /// Keywords are AND-combined; a status of `Installed` also matches
    /// updateable packages. Results are ordered by title.
    pub fn find_packages(
        &self,
        status: Option<PackageStatus>,
        query: &str,
        cat0: CategoryFilter,
        cat1: CategoryFilter,
    ) -> Result<Vec<Package>> {
        let (where_clause, params) = Self::build_filter(status, query, cat0, cat1);
        let sql = format!(
            "SELECT {} FROM PACKAGE {} ORDER BY TITLE",
            Self::PACKAGE_COLUMNS,
            where_clause
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params_from_iter(params), |row| {
                Self::package_from_row(&conn, row)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    /// Category aggregation for the same filter: (id, package count, name)
    /// per distinct category at `level`, ordered by name
    pub fn find_categories(
        &self,
        status: Option<PackageStatus>,
        query: &str,
        level: u8,
        cat0: CategoryFilter,
        cat1: CategoryFilter,
    ) -> Result<Vec<CategoryCount>> {
        let (where_clause, params) = Self::build_filter(status, query, cat0, cat1);
        let sql = format!(
            "SELECT CATEGORY.ID, COUNT(*), CATEGORY.NAME \
             FROM PACKAGE LEFT JOIN CATEGORY ON PACKAGE.CATEGORY{} = CATEGORY.ID \
             {} GROUP BY CATEGORY.ID, CATEGORY.NAME ORDER BY CATEGORY.NAME",
            level, where_clause
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok(CategoryCount {
                    id: row.get(0)?,
                    count: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Recompute the STATUS column of one package from the installed set
    pub fn update_status(&self, installed: &InstalledPackages, package: &str) -> Result<()> {
        let versions = self.get_package_versions(package)?;

        let mut newest_installed: Option<&PackageVersion> = None;
        let mut newest_installable: Option<&PackageVersion> = None;
        for pv in &versions {
            if installed.is_installed(&pv.package, &pv.version) {
                if newest_installed
                    .map(|n| n.version.compare(&pv.version) == std::cmp::Ordering::Less)
                    .unwrap_or(true)
                {
                    newest_installed = Some(pv);
                }
            }
            if pv.installable() {
                if newest_installable
                    .map(|n| n.version.compare(&pv.version) == std::cmp::Ordering::Less)
                    .unwrap_or(true)
                {
                    newest_installable = Some(pv);
                }
            }
        }

        let status = match newest_installed {
            Some(ni) => {
                let updateable = newest_installable
                    .map(|na| na.version.compare(&ni.version) == std::cmp::Ordering::Greater)
                    .unwrap_or(false);
                if updateable {
                    PackageStatus::Updateable
                } else {
                    PackageStatus::Installed
                }
            }
            None => PackageStatus::NotInstalled,
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE PACKAGE SET STATUS = ?1 WHERE NAME = ?2",
            params![status.as_i64(), package],
        )?;
        Ok(())
    }

    /// Recompute STATUS for every package with at least one installed
    /// version
    pub fn update_status_for_installed(&self, installed: &InstalledPackages) -> Result<()> {
        for package in installed.get_packages() {
            self.update_status(installed, &package)?;
        }
        Ok(())
    }

    /// Number of packages with a newer installable version
    pub fn count_updates(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM PACKAGE WHERE STATUS = ?1",
            [PackageStatus::Updateable.as_i64()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Delete packages that no longer have any version; run after a refresh
    pub fn remove_orphan_packages(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM PACKAGE WHERE NOT EXISTS \
             (SELECT 1 FROM PACKAGE_VERSION WHERE PACKAGE = PACKAGE.NAME)",
            [],
        )?;
        if n > 0 {
            debug!("Removed {} packages without versions", n);
        }
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Repository bookkeeping
    // ------------------------------------------------------------------

    /// Record the repository URLs this catalogue was built from
    pub fn set_repositories(&self, urls: &[String]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM REPOSITORY", [])?;
        for url in urls {
            tx.execute("INSERT INTO REPOSITORY (URL) VALUES (?1)", [url])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// URLs recorded by the last refresh, in order
    pub fn get_repositories(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT URL FROM REPOSITORY ORDER BY ID")?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn sample_package() -> Package {
        let mut p = Package::new("a.b.Foo", "Foo");
        p.description = "A sample tool".to_string();
        p.categories = vec!["Tools|Editors".to_string()];
        p
    }

    fn sample_version(version: &str, download: bool) -> PackageVersion {
        let mut pv = PackageVersion::new("a.b.Foo", v(version));
        if download {
            pv.download = Some(format!("https://example.com/foo-{}.zip", version));
        }
        pv
    }

    #[test]
    fn test_save_and_find_package() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.save_package(&sample_package(), true).unwrap();

        let p = catalog.find_package("a.b.Foo").unwrap().unwrap();
        assert_eq!(p.title, "Foo");
        assert_eq!(p.categories, vec!["Editors"]);
        assert!(catalog.find_package("a.b.Missing").unwrap().is_none());
    }

    #[test]
    fn test_save_replace_vs_ignore() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut p = sample_package();
        catalog.save_package(&p, true).unwrap();

        p.title = "Changed".to_string();
        catalog.save_package(&p, false).unwrap();
        assert_eq!(
            catalog.find_package("a.b.Foo").unwrap().unwrap().title,
            "Foo"
        );

        catalog.save_package(&p, true).unwrap();
        assert_eq!(
            catalog.find_package("a.b.Foo").unwrap().unwrap().title,
            "Changed"
        );
    }

    #[test]
    fn test_category_tree_is_interned_once() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.save_package(&sample_package(), true).unwrap();

        let mut other = Package::new("a.b.Bar", "Bar");
        other.categories = vec!["Tools|Editors".to_string()];
        catalog.save_package(&other, true).unwrap();

        let categories = catalog
            .find_categories(None, "", 0, CategoryFilter::Any, CategoryFilter::Any)
            .unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].count, 2);
        assert_eq!(categories[0].name.as_deref(), Some("Tools"));
    }

    #[test]
    fn test_version_blob_round_trip() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut pv = sample_version("1.0", true);
        pv.dependencies.push(crate::model::Dependency::new(
            "a.b.Bar",
            v("1"),
            v("2"),
        ));
        catalog.save_package_version(&pv, true).unwrap();

        let loaded = catalog
            .find_package_version("a.b.Foo", &v("1.0"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.download, pv.download);
        assert_eq!(loaded.dependencies, pv.dependencies);
    }

    #[test]
    fn test_get_package_versions_newest_first() {
        let catalog = Catalog::open_in_memory().unwrap();
        for version in ["1.0", "2.0", "1.5"] {
            catalog
                .save_package_version(&sample_version(version, true), true)
                .unwrap();
        }
        let versions = catalog.get_package_versions("a.b.Foo").unwrap();
        let order: Vec<String> = versions.iter().map(|pv| pv.version.to_string()).collect();
        assert_eq!(order, vec!["2.0", "1.5", "1.0"]);
    }

    #[test]
    fn test_find_packages_keywords_and_combined() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.save_package(&sample_package(), true).unwrap();
        let mut other = Package::new("a.b.Bar", "Bar");
        other.description = "Another sample".to_string();
        catalog.save_package(&other, true).unwrap();

        let hits = catalog
            .find_packages(None, "sample tool", CategoryFilter::Any, CategoryFilter::Any)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "a.b.Foo");

        let hits = catalog
            .find_packages(None, "SAMPLE", CategoryFilter::Any, CategoryFilter::Any)
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_find_packages_category_filters() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.save_package(&sample_package(), true).unwrap();
        catalog
            .save_package(&Package::new("a.b.Plain", "Plain"), true)
            .unwrap();

        let unset = catalog
            .find_packages(None, "", CategoryFilter::Unset, CategoryFilter::Any)
            .unwrap();
        assert_eq!(unset.len(), 1);
        assert_eq!(unset[0].name, "a.b.Plain");

        let categories = catalog
            .find_categories(None, "", 0, CategoryFilter::Any, CategoryFilter::Any)
            .unwrap();
        let tools_id = categories
            .iter()
            .find(|c| c.name.as_deref() == Some("Tools"))
            .and_then(|c| c.id)
            .unwrap();
        let tools = catalog
            .find_packages(None, "", CategoryFilter::Id(tools_id), CategoryFilter::Any)
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "a.b.Foo");

        assert_eq!(
            catalog.find_category(tools_id).unwrap().as_deref(),
            Some("Tools")
        );
    }

    #[test]
    fn test_find_packages_by_short_name() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.save_package(&sample_package(), true).unwrap();
        catalog
            .save_package(&Package::new("c.d.Foo", "Other Foo"), true)
            .unwrap();
        catalog
            .save_package(&Package::new("a.b.Bar", "Bar"), true)
            .unwrap();

        let hits = catalog.find_packages_by_short_name("Foo").unwrap();
        let names: Vec<&str> = hits.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a.b.Foo", "c.d.Foo"]);
    }

    #[test]
    fn test_license_cache_invalidation() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut l = License::new("gpl3", "GPLv3");
        l.url = "https://www.gnu.org/licenses/gpl-3.0.html".to_string();
        catalog.save_license(&l, true).unwrap();

        let first = catalog.find_license("gpl3").unwrap().unwrap();
        let second = catalog.find_license("gpl3").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        catalog.clear().unwrap();
        assert!(catalog.find_license("gpl3").unwrap().is_none());
    }

    #[test]
    fn test_remove_orphan_packages() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.save_package(&sample_package(), true).unwrap();
        catalog
            .save_package(&Package::new("a.b.Orphanless", "Kept"), true)
            .unwrap();
        catalog
            .save_package_version(&sample_version("1.0", true), true)
            .unwrap();

        let removed = catalog.remove_orphan_packages().unwrap();
        assert_eq!(removed, 1);
        assert!(catalog.find_package("a.b.Foo").unwrap().is_some());
        assert!(catalog.find_package("a.b.Orphanless").unwrap().is_none());
    }

    #[test]
    fn test_find_by_msi_guid() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut pv = sample_version("1.0", true);
        pv.msi_guid = Some("{11111111-2222-3333-4444-555555555555}".to_string());
        catalog.save_package_version(&pv, true).unwrap();

        let found = catalog
            .find_package_version_by_msi_guid("{11111111-2222-3333-4444-555555555555}")
            .unwrap();
        assert!(found.is_some());
        assert!(catalog
            .find_package_version_by_msi_guid("{00000000-0000-0000-0000-000000000000}")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_repository_urls_round_trip() {
        let catalog = Catalog::open_in_memory().unwrap();
        let urls = vec![
            "https://example.com/rep1.xml".to_string(),
            "https://example.com/rep2.xml".to_string(),
        ];
        catalog.set_repositories(&urls).unwrap();
        assert_eq!(catalog.get_repositories().unwrap(), urls);
    }
}
