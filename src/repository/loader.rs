// src/repository/loader.rs

//! Downloading and merging remote repositories
//!
//! Repository URLs are configured in the registry under
//! `Software\Npackd\Npackd\Reps`. Each document is downloaded to a
//! temporary file while its SHA-1 is computed, parsed, and merged into one
//! in-memory `Repository`. The concatenated per-URL digests (plus a
//! serialization-version byte) are hashed again into the aggregate key
//! that decides whether the full-text index can be reused.

use crate::error::{Error, Result};
use crate::job::Job;
use crate::registry::{RegistryHive, REPS_KEY};
use crate::repository::{xml, Repository};
use sha1::{Digest, Sha1};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{info, warn};

/// Timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for a failed download
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads
const STREAM_BUFFER_SIZE: usize = 8192;

/// Serialization version mixed into the aggregate key; bump when the
/// indexed document format changes
const SERIALIZATION_VERSION: &str = "2";

/// Read the configured repository URLs from the hive
pub fn get_repository_urls(hive: &dyn RegistryHive) -> Result<Vec<String>> {
    let count = hive.get_dword(REPS_KEY, "Count", false)?.unwrap_or(0);
    let mut urls = Vec::new();
    for i in 0..count {
        let key = format!("{}\\{}", REPS_KEY, i);
        if let Some(url) = hive.get_string(&key, "URL", false)? {
            urls.push(url);
        }
    }
    Ok(urls)
}

/// Store the repository URL list in the hive
pub fn set_repository_urls(hive: &dyn RegistryHive, urls: &[String]) -> Result<()> {
    hive.set_dword(REPS_KEY, "Count", urls.len() as u32)?;
    for (i, url) in urls.iter().enumerate() {
        let key = format!("{}\\{}", REPS_KEY, i);
        hive.set_string(&key, "URL", url)?;
    }
    Ok(())
}

/// The outcome of loading all configured repositories
#[derive(Debug)]
pub struct LoadResult {
    pub repository: Repository,
    /// Aggregate SHA-1 over all downloaded documents; gates index reuse
    pub key: String,
    pub urls: Vec<String>,
}

/// Download, parse and merge every configured repository
///
/// The well-known packages are added after the merge so that remote
/// definitions take precedence over the built-in stubs.
pub fn load(hive: &dyn RegistryHive, job: &mut Job) -> Result<LoadResult> {
    let urls = get_repository_urls(hive)?;
    if urls.is_empty() {
        return Err(Error::Internal("No repositories defined".to_string()));
    }

    let mut repository = Repository::new();
    let mut key_input = String::new();

    for (i, url) in urls.iter().enumerate() {
        job.check_cancelled()?;
        job.set_hint(&format!("Repository {} of {}", i + 1, urls.len()));

        let mut sub = job.sub_job(0.9 / urls.len() as f64);
        let (text, sha1) = load_one(url, &mut sub).map_err(|e| match e {
            Error::UserCancel => Error::UserCancel,
            other => Error::Network(format!("Error loading the repository {}: {}", url, other)),
        })?;
        key_input.push_str(&sha1);

        let parsed = match xml::parse_repository(&text) {
            Ok(parsed) => parsed,
            Err(e @ Error::XmlParse { .. }) | Err(e @ Error::IncompatibleRepository(_)) => {
                return Err(e)
            }
            Err(e) => {
                return Err(Error::Internal(format!(
                    "Error loading the repository {}: {}",
                    url, e
                )))
            }
        };
        repository.merge(parsed);
        sub.complete();
        job.set_progress(0.9 * (i + 1) as f64 / urls.len() as f64);
    }

    repository.add_well_known_packages();

    key_input.push_str(SERIALIZATION_VERSION);
    let key = hex_sha1(key_input.as_bytes());

    info!(
        "Loaded {} packages, {} versions from {} repositories",
        repository.packages.len(),
        repository.versions.len(),
        urls.len()
    );

    job.complete();
    Ok(LoadResult {
        repository,
        key,
        urls,
    })
}

/// Fetch one repository document, returning its text and SHA-1
///
/// `http`/`https` URLs go through the HTTP client with retries; `file`
/// URLs and plain paths are read from the filesystem.
pub fn load_one(url: &str, job: &mut Job) -> Result<(String, String)> {
    job.set_hint("Downloading");

    let bytes = if url.starts_with("http://") || url.starts_with("https://") {
        download(url, job)?
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        std::fs::read(path)
            .map_err(|e| Error::Network(format!("Cannot read {}: {}", path, e)))?
    };

    let sha1 = hex_sha1(&bytes);
    let text = String::from_utf8(bytes)
        .map_err(|e| Error::Network(format!("Invalid UTF-8 in {}: {}", url, e)))?;

    job.complete();
    Ok((text, sha1))
}

/// Download a URL to a temporary file, hashing while streaming
fn download(url: &str, job: &mut Job) -> Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        job.check_cancelled()?;

        match client.get(url).send() {
            Ok(mut response) => {
                if !response.status().is_success() {
                    return Err(Error::Network(format!(
                        "HTTP {} from {}",
                        response.status(),
                        url
                    )));
                }

                let total = response.content_length().unwrap_or(0);
                let mut file = tempfile::NamedTempFile::new()
                    .map_err(|e| Error::Filesystem(e.to_string()))?;
                let mut hasher = Sha1::new();
                let mut buffer = [0u8; STREAM_BUFFER_SIZE];
                let mut downloaded = 0u64;

                loop {
                    let n = response
                        .read(&mut buffer)
                        .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buffer[..n]);
                    file.write_all(&buffer[..n])
                        .map_err(|e| Error::Filesystem(e.to_string()))?;
                    downloaded += n as u64;
                    if total > 0 {
                        job.set_progress(downloaded as f64 / total as f64);
                    }
                }

                let mut bytes = Vec::new();
                let mut reader = file.reopen().map_err(|e| Error::Filesystem(e.to_string()))?;
                reader
                    .read_to_end(&mut bytes)
                    .map_err(|e| Error::Filesystem(e.to_string()))?;
                return Ok(bytes);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(Error::Network(format!(
                        "Failed to download {} after {} attempts: {}",
                        url, attempt, e
                    )));
                }
                warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
            }
        }
    }
}

/// Lowercase hex SHA-1 of a byte slice
pub fn hex_sha1(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Lowercase hex SHA-1 of a file's contents
pub fn hex_sha1_file(path: &std::path::Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
