// src/db/paths.rs

//! Locations of the catalogue database, search index and install root

use std::env;
use std::path::PathBuf;

/// Filesystem locations used by the core
///
/// `discover()` derives the standard Windows locations; tests build their
/// own instance pointing into a scratch directory.
#[derive(Debug, Clone)]
pub struct Locations {
    /// Directory holding Data.db (CSIDL_COMMON_APPDATA\Npackd)
    pub data_dir: PathBuf,
    /// Directory holding the full-text index
    /// (CSIDL_LOCAL_APPDATA\Npackd\Npackd\Index)
    pub index_dir: PathBuf,
    /// Root under which packages are installed
    pub install_dir: PathBuf,
}

impl Locations {
    pub fn discover() -> Self {
        let data_dir = env::var_os("NPACKD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| common_app_data().join("Npackd"));
        let index_dir = env::var_os("NPACKD_INDEX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| local_app_data().join("Npackd").join("Npackd").join("Index"));
        let install_dir = env::var_os("NPACKD_INSTALL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| program_files().join("Npackd"));

        Self {
            data_dir,
            index_dir,
            install_dir,
        }
    }

    /// Rooted at one scratch directory; used by tests
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            data_dir: root.join("data"),
            index_dir: root.join("index"),
            install_dir: root.join("packages"),
        }
    }

    /// Path of the SQLite catalogue
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("Data.db")
    }

    /// Directory for installations synthesised by third-party detection
    pub fn detected_dir(&self) -> PathBuf {
        self.install_dir.join("NpackdDetected")
    }
}

fn common_app_data() -> PathBuf {
    env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir())
}

fn local_app_data() -> PathBuf {
    env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir())
}

fn program_files() -> PathBuf {
    env::var_os("ProgramFiles")
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir())
}
