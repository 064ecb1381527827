//! StorageConfig and resolve_paths for catalog storage.

use crate::config::xdg;
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_DB_PATH: &str = ".arbor/catalog";
const DEFAULT_BLOB_DIR: &str = ".arbor/uploads";

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BLOB_DIR)
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the sled catalog database (relative to workspace root)
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory holding uploaded files and preview images (relative to workspace root)
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

impl StorageConfig {
    /// Resolve storage paths to actual filesystem locations.
    ///
    /// Default paths are placed in the workspace's XDG data directory; any
    /// other path is taken relative to the workspace root.
    pub fn resolve_paths(&self, workspace_root: &Path) -> Result<(PathBuf, PathBuf), ApiError> {
        let db_path = if self.db_path == Path::new(DEFAULT_DB_PATH) {
            xdg::workspace_data_dir(workspace_root)?.join("catalog")
        } else {
            workspace_root.join(&self.db_path)
        };

        let blob_dir = if self.blob_dir == Path::new(DEFAULT_BLOB_DIR) {
            xdg::workspace_data_dir(workspace_root)?.join("uploads")
        } else {
            workspace_root.join(&self.blob_dir)
        };

        Ok((db_path, blob_dir))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            blob_dir: default_blob_dir(),
        }
    }
}
