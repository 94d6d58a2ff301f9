// src/error.rs

//! Error type shared by all npackd modules
//!
//! The taxonomy is flat: every failure a public operation can report maps to
//! exactly one variant. Detector failures are logged and swallowed by the
//! refresh pipeline and never surface through this type.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A version string could not be parsed
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// A package name is not a valid reverse-DNS name
    #[error("Invalid package name: {0}")]
    InvalidPackageName(String),

    /// Repository XML was malformed
    #[error("XML parsing failed at line {line}, column {column}: {message}")]
    XmlParse {
        line: u32,
        column: u32,
        message: String,
    },

    /// The repository declares a spec-version this build cannot read
    #[error("Incompatible repository specification version: {0}")]
    IncompatibleRepository(String),

    /// HTTP download failure
    #[error("Download failed: {0}")]
    Network(String),

    /// The catalogue database could not be opened or created
    #[error("Cannot open the package database: {0}")]
    DbOpen(String),

    /// An SQL statement or transaction failed
    #[error("Database error: {0}")]
    DbError(String),

    /// Reading or writing the Windows registry failed
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// A filesystem operation failed
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// A stored dependency cannot be satisfied from the installed set
    #[error("Unresolved dependency on {0}")]
    DependencyUnresolved(String),

    /// No version of the package has a download URL
    #[error("No installable version found for the package {0}")]
    NoInstallable(String),

    /// No version of the package is installed
    #[error("No installed version found for the package {0}")]
    NoInstalled(String),

    /// The newest installable version is already installed
    #[error("The newest version ({version}) for the package {package} is already installed")]
    AlreadyNewest { package: String, version: String },

    /// Another operation holds the advisory lock for this package version
    #[error("{0} is locked by another operation")]
    LockedByOtherOperation(String),

    /// The user cancelled the running job
    #[error("The operation was cancelled")]
    UserCancel,

    /// Invariant violation or unexpected state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::UserCancel => 1,
            Error::InvalidVersion(_)
            | Error::InvalidPackageName(_)
            | Error::XmlParse { .. }
            | Error::IncompatibleRepository(_) => 2,
            Error::NoInstalled(_) => 3,
            Error::DependencyUnresolved(_) => 4,
            Error::DbOpen(_) | Error::DbError(_) => 5,
            Error::Network(_) => 6,
            _ => 255,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::DbError(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Filesystem(e.to_string())
    }
}
