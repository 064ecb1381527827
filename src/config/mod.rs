//! Configuration
//!
//! Layered configuration built with the `config` crate. Precedence, lowest to
//! highest: built-in defaults, global file (`$XDG_CONFIG_HOME/arbor/config.toml`),
//! workspace file (`<workspace>/arbor.toml`) or an explicit `--config` file,
//! then `ARBOR__*` environment variables (`__` separates nested keys).

pub mod facade;
pub mod merge;
pub mod sources;

pub mod paths {
    pub mod xdg_root;
}

pub mod workspace {
    pub mod storage_paths;
}

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;
pub use workspace::storage_paths::StorageConfig;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub catalog: CatalogSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

pub(crate) fn default_page_size() -> usize {
    6
}

pub(crate) fn default_root_title() -> String {
    "Resources".to_string()
}

pub(crate) fn default_lock_timeout_ms() -> u64 {
    5_000
}

pub(crate) fn default_blob_timeout_ms() -> u64 {
    10_000
}

pub(crate) fn default_max_tree_depth() -> usize {
    256
}

/// Tree service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSettings {
    /// Children per listing chunk
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Title given to the root folder by `init`, and used to find it in legacy catalogs
    #[serde(default = "default_root_title")]
    pub root_title: String,

    /// Maximum wait for node locks (milliseconds)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Maximum duration of a single blob operation (milliseconds)
    #[serde(default = "default_blob_timeout_ms")]
    pub blob_timeout_ms: u64,

    /// Depth beyond which a traversal treats the tree as corrupt
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            root_title: default_root_title(),
            lock_timeout_ms: default_lock_timeout_ms(),
            blob_timeout_ms: default_blob_timeout_ms(),
            max_tree_depth: default_max_tree_depth(),
        }
    }
}

impl CatalogSettings {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.page_size == 0 {
            return Err(ApiError::ConfigError(
                "catalog.page_size must be greater than 0".to_string(),
            ));
        }
        if self.root_title.trim().is_empty() {
            return Err(ApiError::ConfigError(
                "catalog.root_title must not be empty".to_string(),
            ));
        }
        if self.max_tree_depth == 0 {
            return Err(ApiError::ConfigError(
                "catalog.max_tree_depth must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn blob_timeout(&self) -> Duration {
        Duration::from_millis(self.blob_timeout_ms)
    }
}

impl ArborConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        self.catalog.validate()
    }
}
