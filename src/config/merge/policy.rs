//! Built-in defaults applied before any file or environment source.

use crate::config::{
    default_blob_timeout_ms, default_lock_timeout_ms, default_max_tree_depth, default_page_size,
    default_root_title,
};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};

/// Builder seeded with the catalog defaults.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("catalog.page_size", default_page_size() as u64)?
        .set_default("catalog.root_title", default_root_title())?
        .set_default("catalog.lock_timeout_ms", default_lock_timeout_ms())?
        .set_default("catalog.blob_timeout_ms", default_blob_timeout_ms())?
        .set_default("catalog.max_tree_depth", default_max_tree_depth() as u64)
}
