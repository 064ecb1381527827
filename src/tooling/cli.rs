//! CLI Tooling
//!
//! Command-line interface for all catalog operations. Every command runs
//! against the catalog and upload directory of one workspace.

use crate::blob::FsBlobStore;
use crate::config::{ArborConfig, ConfigLoader};
use crate::error::{ApiError, StorageError};
use crate::logging::LoggingConfig;
use crate::store::persistence::SledResourceStore;
use crate::store::ResourceStore;
use crate::tree::{IntegrityReport, RecoveryReport, TreeService, UploadItem};
use crate::types::NodeId;
use crate::views::PageView;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;

/// Arbor CLI - hierarchical resource catalog
#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Browse and edit a catalog of folders, files and links")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Fold logging flags into the loaded logging configuration
    pub fn apply_log_overrides(&self, logging: &mut LoggingConfig) {
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            logging.file = Some(file.clone());
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the catalog and its root folder
    Init {
        /// Drop an existing catalog and start over
        #[arg(long)]
        force: bool,
    },
    /// List a folder (the root when no id is given)
    Ls {
        /// Node ID
        id: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show a single node
    Show {
        /// Node ID
        id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Create a folder
    Mkdir {
        /// Parent folder ID
        parent: String,
        title: String,
    },
    /// Upload one or more files into a folder
    Upload {
        /// Parent folder ID
        parent: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Create a link to an external URL
    Link {
        /// Parent folder ID
        parent: String,
        title: String,
        href: String,
    },
    /// Set the preview image of a link
    LinkImage {
        /// Link ID
        id: String,
        /// PNG image file
        image: PathBuf,
    },
    /// Rename a node
    Rename {
        /// Node ID
        id: String,
        title: String,
    },
    /// Delete a node and everything beneath it
    Rm {
        /// Node ID
        id: String,
    },
    /// Restore or purge blobs left behind by interrupted deletes
    Recover,
    /// Verify the catalog's structural invariants
    Check {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration as TOML
    Config,
}

type WorkspaceTree = TreeService<SledResourceStore, FsBlobStore>;

/// CLI context for one workspace
pub struct CliContext {
    tree: WorkspaceTree,
    config: ArborConfig,
    workspace_root: PathBuf,
    runtime: Runtime,
}

impl CliContext {
    /// Load configuration and open the workspace's catalog and upload directory
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = load_config(&workspace_root, config_path.as_deref())?;
        Self::from_config(workspace_root, config)
    }

    /// Open the workspace with an already loaded configuration
    pub fn from_config(workspace_root: PathBuf, config: ArborConfig) -> Result<Self, ApiError> {
        let (db_path, blob_dir) = config.storage.resolve_paths(&workspace_root)?;
        std::fs::create_dir_all(&db_path).map_err(StorageError::from)?;
        let store = Arc::new(SledResourceStore::new(&db_path)?);
        let blobs = Arc::new(FsBlobStore::new(&blob_dir)?);
        let tree = TreeService::new(store, blobs, config.catalog.clone())?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(StorageError::from)?;

        info!(workspace = %workspace_root.display(), db = %db_path.display(), blobs = %blob_dir.display(), "Opened workspace");
        Ok(Self {
            tree,
            config,
            workspace_root,
            runtime,
        })
    }

    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn tree(&self) -> &WorkspaceTree {
        &self.tree
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        self.runtime.block_on(self.execute_inner(command))
    }

    async fn execute_inner(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Init { force } => self.handle_init(*force).await,
            Commands::Ls { id, format } => {
                let id = id.as_deref().map(parse_node_id).transpose()?;
                let view = self.tree.get_page(id)?;
                render(format, &view, format_page_text)
            }
            Commands::Show { id, format } => {
                let node = self.tree.get_node(&parse_node_id(id)?)?;
                render(format, &node, |node| {
                    let mut table = Table::new();
                    table.load_preset(comfy_table::presets::UTF8_FULL);
                    table.set_header(vec!["Field", "Value"]);
                    table.add_row(vec!["ID".to_string(), node.id.to_string()]);
                    table.add_row(vec!["Type".to_string(), node.resource_type().to_string()]);
                    table.add_row(vec!["Title".to_string(), node.title.clone()]);
                    if let Some(href) = node.href() {
                        table.add_row(vec!["Href".to_string(), href.to_string()]);
                    }
                    table.to_string()
                })
            }
            Commands::Mkdir { parent, title } => {
                let id = self.tree.add_folder(&parse_node_id(parent)?, title).await?;
                Ok(format!("Created folder {}", id))
            }
            Commands::Upload { parent, files } => self.handle_upload(parent, files).await,
            Commands::Link {
                parent,
                title,
                href,
            } => {
                let node = self
                    .tree
                    .add_link(&parse_node_id(parent)?, title, href)
                    .await?;
                Ok(format!(
                    "Created link {} ({} -> {})",
                    node.id,
                    node.title,
                    node.href().unwrap_or_default()
                ))
            }
            Commands::LinkImage { id, image } => {
                let content = tokio::fs::read(image).await.map_err(StorageError::from)?;
                let extension = image
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or_default();
                let location = self
                    .tree
                    .change_link_image(&parse_node_id(id)?, &content, extension)
                    .await?;
                Ok(format!("Stored preview image at {}", location))
            }
            Commands::Rename { id, title } => {
                let node = self.tree.rename_object(&parse_node_id(id)?, title).await?;
                Ok(format!("Renamed {} to {:?}", node.id, node.title))
            }
            Commands::Rm { id } => {
                let id = parse_node_id(id)?;
                let kind = self.tree.delete_subtree(&id).await?;
                Ok(format!("Deleted {} {}", kind, id))
            }
            Commands::Recover => {
                let report = self.tree.recover_interrupted_deletions().await?;
                Ok(format_recovery(&report))
            }
            Commands::Check { format } => {
                let report = self.tree.verify_integrity().await?;
                render(format, &report, format_integrity_text)
            }
            Commands::Config => toml::to_string_pretty(&self.config)
                .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e))),
        }
    }

    async fn handle_init(&self, force: bool) -> Result<String, ApiError> {
        let existing = self.tree.store().counts()?;
        if existing.nodes > 0 && !force {
            return Ok(format!(
                "Catalog already initialized ({} nodes). Use --force to recreate it.",
                existing.nodes
            ));
        }
        let root = self.tree.initialize_catalog().await?;
        Ok(format!(
            "Initialized catalog with root {:?} ({})",
            self.config.catalog.root_title, root
        ))
    }

    async fn handle_upload(&self, parent: &str, files: &[PathBuf]) -> Result<String, ApiError> {
        let parent = parse_node_id(parent)?;
        let mut items = Vec::with_capacity(files.len());
        for path in files {
            let content = tokio::fs::read(path).await.map_err(StorageError::from)?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            items.push(UploadItem::new(filename, content));
        }

        let results = self.tree.add_files(&parent, &items).await;
        let mut table = Table::new();
        table.load_preset(comfy_table::presets::UTF8_FULL);
        table.set_header(vec!["File", "Result"]);
        let mut failed = 0;
        for (path, result) in files.iter().zip(&results) {
            let outcome = match result {
                Ok(id) => id.to_string(),
                Err(e) => {
                    failed += 1;
                    format!("error: {}", e)
                }
            };
            table.add_row(vec![path.display().to_string(), outcome]);
        }
        Ok(format!(
            "{}\nUploaded {} of {} file(s)",
            table,
            results.len() - failed,
            results.len()
        ))
    }
}

/// Load the explicit config file if given, otherwise the layered workspace config
pub fn load_config(workspace_root: &Path, config_path: Option<&Path>) -> Result<ArborConfig, ApiError> {
    match config_path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(workspace_root),
    }
}

fn parse_node_id(raw: &str) -> Result<NodeId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::InvalidInput(format!("malformed node id {:?}: {}", raw, e)))
}

fn render<T: Serialize>(
    format: &str,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> Result<String, ApiError> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map_err(|e| ApiError::InvalidPayload(format!("Failed to encode output: {}", e))),
        "text" => Ok(text(value)),
        other => Err(ApiError::InvalidInput(format!(
            "Invalid format: {} (must be 'text' or 'json')",
            other
        ))),
    }
}

/// Format a folder listing, one table row per child, grouped by chunk
fn format_page_text(view: &PageView) -> String {
    let mut output = format!("{} ({}) {}\n", view.title, view.resource_type, view.id);
    if let Some(parent) = view.parent_id {
        output.push_str(&format!("Parent: {}\n", parent));
    }
    if let Some(href) = &view.href {
        output.push_str(&format!("Href: {}\n", href));
    }
    if view.chunks.is_empty() {
        output.push_str("(empty)\n");
        return output;
    }

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Page", "Type", "Title", "ID", "Target"]);
    for (page, chunk) in view.chunks.iter().enumerate() {
        for entry in chunk {
            let target = entry
                .href
                .clone()
                .or_else(|| entry.blob.clone())
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                (page + 1).to_string(),
                entry.resource_type.to_string(),
                entry.title.clone(),
                entry.id.to_string(),
                target,
            ]);
        }
    }
    output.push_str(&table.to_string());
    output
}

fn format_integrity_text(report: &IntegrityReport) -> String {
    let mut output = format!("Nodes: {}\nLinks: {}\n", report.nodes, report.links);
    if report.is_healthy() {
        output.push_str("No violations found.");
        return output;
    }
    output.push_str(&format!("Violations ({}):\n", report.violations.len()));
    for violation in &report.violations {
        output.push_str(&format!("  - {}\n", violation));
    }
    output
}

fn format_recovery(report: &RecoveryReport) -> String {
    if report.batches == 0 {
        return "No interrupted deletes found.".to_string();
    }
    let mut output = format!(
        "Examined {} batch(es): restored {}, purged {}",
        report.batches,
        report.restored.len(),
        report.purged.len()
    );
    if !report.skipped.is_empty() {
        output.push_str(&format!(", skipped {} (busy)", report.skipped.len()));
    }
    output
}
