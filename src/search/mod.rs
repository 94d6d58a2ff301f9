// src/search/mod.rs

//! Disk-backed full-text index over the catalogue
//!
//! A secondary index used for keyword search with installed/updateable
//! filters. Validity is keyed off the aggregate SHA-1 of the last
//! repository load: when the stored key matches, the index is reopened,
//! otherwise it is rebuilt from the catalogue. One document is indexed per
//! package and per package version.

use crate::db::Catalog;
use crate::error::{Error, Result};
use crate::installed::InstalledPackages;
use crate::job::Job;
use crate::model::{PackageStatus, PackageVersion};
use std::path::Path;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, OwnedValue, Schema, STORED, STRING, TEXT,
};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};
use tracing::{info, warn};

/// Hard cap on returned matches; a warning is logged when it is hit
const MAX_RESULTS: usize = 2000;

/// How many entries to index between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 100;

const KIND_PACKAGE: &str = "package";
const KIND_PACKAGE_VERSION: &str = "package_version";

const STATUS_INSTALLED: &str = "installed";
const STATUS_NOT_INSTALLED: &str = "not_installed";
const STATUS_UPDATEABLE: &str = "updateable";

/// Status restriction of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    All,
    /// Installed packages, updateable ones included
    Installed,
    Updateable,
}

struct Fields {
    id: Field,
    kind: Field,
    package: Field,
    version: Field,
    content: Field,
    status: Field,
}

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter<TantivyDocument>>,
    fields: Fields,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let fields = Fields {
        id: builder.add_text_field("id", STRING | STORED),
        kind: builder.add_text_field("kind", STRING),
        package: builder.add_text_field("package", STRING | STORED),
        version: builder.add_text_field("version", STRING | STORED),
        content: builder.add_text_field("content", TEXT),
        status: builder.add_text_field("status", STRING),
    };
    (builder.build(), fields)
}

fn index_error(e: tantivy::TantivyError) -> Error {
    Error::Internal(format!("Search index error: {}", e))
}

impl SearchIndex {
    /// Reopen an existing index directory
    pub fn open(dir: &Path) -> Result<Self> {
        let index = Index::open_in_dir(dir).map_err(index_error)?;
        Self::wrap(index)
    }

    /// Rebuild the index from scratch out of the catalogue
    pub fn rebuild(
        dir: &Path,
        catalog: &Catalog,
        installed: &InstalledPackages,
        job: &mut Job,
    ) -> Result<Self> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;

        let (schema, _) = build_schema();
        let index = Index::create_in_dir(dir, schema).map_err(index_error)?;
        let search = Self::wrap(index)?;

        let packages = catalog.find_packages(
            None,
            "",
            crate::db::CategoryFilter::Any,
            crate::db::CategoryFilter::Any,
        )?;
        let total = packages.len().max(1);

        {
            let mut writer = search.writer.lock().unwrap();
            for (i, p) in packages.iter().enumerate() {
                if i % CANCEL_CHECK_INTERVAL == 0 {
                    job.check_cancelled()?;
                    job.set_progress(i as f64 / total as f64);
                }

                let installed_status = p.status >= PackageStatus::Installed;
                let mut doc = TantivyDocument::default();
                doc.add_text(search.fields.id, format!("p:{}", p.name));
                doc.add_text(search.fields.kind, KIND_PACKAGE);
                doc.add_text(search.fields.package, &p.name);
                doc.add_text(
                    search.fields.content,
                    format!("{} {} {}", p.title, p.description, searchable_name(&p.name)),
                );
                if installed_status {
                    doc.add_text(search.fields.status, STATUS_INSTALLED);
                }
                if p.status == PackageStatus::Updateable {
                    doc.add_text(search.fields.status, STATUS_UPDATEABLE);
                }
                writer.add_document(doc).map_err(index_error)?;

                for pv in catalog.get_package_versions(&p.name)? {
                    let pv_installed = installed.is_installed(&pv.package, &pv.version);
                    writer
                        .add_document(version_document(
                            &search.fields,
                            &pv,
                            pv_installed,
                            pv_installed && p.status == PackageStatus::Updateable,
                        ))
                        .map_err(index_error)?;
                }
            }
            writer.commit().map_err(index_error)?;
        }

        search.reader.reload().map_err(index_error)?;
        info!("Search index rebuilt with {} packages", packages.len());
        job.complete();
        Ok(search)
    }

    fn wrap(index: Index) -> Result<Self> {
        let (_, fields) = build_schema();
        let writer = index.writer(50_000_000).map_err(index_error)?;
        let reader = index.reader().map_err(index_error)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    /// Search package documents; returns matching package names
    pub fn search(&self, query: &str, filter: SearchFilter) -> Result<Vec<String>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        let query = query.trim();
        if query.is_empty() {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        } else {
            let mut parser =
                QueryParser::for_index(&self.index, vec![self.fields.content]);
            parser.set_conjunction_by_default();
            let parsed = parser
                .parse_query(query)
                .map_err(|e| Error::Internal(format!("Invalid search query: {}", e)))?;
            clauses.push((Occur::Must, parsed));
        }

        clauses.push((
            Occur::Must,
            Box::new(TermQuery::new(
                Term::from_field_text(self.fields.kind, KIND_PACKAGE),
                IndexRecordOption::Basic,
            )),
        ));

        match filter {
            SearchFilter::All => {}
            SearchFilter::Installed => {
                clauses.push((
                    Occur::Must,
                    Box::new(TermQuery::new(
                        Term::from_field_text(self.fields.status, STATUS_INSTALLED),
                        IndexRecordOption::Basic,
                    )),
                ));
            }
            SearchFilter::Updateable => {
                clauses.push((
                    Occur::Must,
                    Box::new(TermQuery::new(
                        Term::from_field_text(self.fields.status, STATUS_UPDATEABLE),
                        IndexRecordOption::Basic,
                    )),
                ));
            }
        }

        let combined = BooleanQuery::new(clauses);
        let searcher = self.reader.searcher();
        let matches = searcher
            .search(&combined, &TopDocs::with_limit(MAX_RESULTS))
            .map_err(index_error)?;

        if matches.len() == MAX_RESULTS {
            warn!("Search returned more than {} matches, truncating", MAX_RESULTS);
        }

        let mut names = Vec::new();
        for (_score, address) in matches {
            let doc: TantivyDocument = searcher.doc(address).map_err(index_error)?;
            if let Some(OwnedValue::Str(name)) = doc.get_first(self.fields.package) {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    /// Targeted update of a single version document after an install or
    /// uninstall, followed by a commit
    pub fn update_package_version(
        &self,
        pv: &PackageVersion,
        installed: bool,
        updateable: bool,
    ) -> Result<()> {
        let id = format!("v:{}:{}", pv.package, pv.version.normalize());
        {
            let mut writer = self.writer.lock().unwrap();
            writer.delete_term(Term::from_field_text(self.fields.id, &id));
            writer
                .add_document(version_document(&self.fields, pv, installed, updateable))
                .map_err(index_error)?;
            writer.commit().map_err(index_error)?;
        }
        self.reader.reload().map_err(index_error)?;
        Ok(())
    }
}

fn version_document(
    fields: &Fields,
    pv: &PackageVersion,
    installed: bool,
    updateable: bool,
) -> TantivyDocument {
    let mut doc = TantivyDocument::default();
    doc.add_text(fields.id, format!("v:{}:{}", pv.package, pv.version.normalize()));
    doc.add_text(fields.kind, KIND_PACKAGE_VERSION);
    doc.add_text(fields.package, &pv.package);
    doc.add_text(fields.version, pv.version.to_string());
    let content = pv
        .source_xml
        .clone()
        .unwrap_or_else(|| crate::repository::xml::version_to_xml(pv));
    doc.add_text(fields.content, content);
    doc.add_text(
        fields.status,
        if installed {
            STATUS_INSTALLED
        } else {
            STATUS_NOT_INSTALLED
        },
    );
    if updateable {
        doc.add_text(fields.status, STATUS_UPDATEABLE);
    }
    doc
}

/// Make a reverse-DNS name searchable by its segments
fn searchable_name(name: &str) -> String {
    name.replace('.', " ")
}
