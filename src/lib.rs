//! Arbor: Hierarchical Resource Catalog
//!
//! A tree of folders, uploaded files and external links. Containment lives in
//! explicit parent→child link rows, blobs live beside the metadata store, and
//! a whole subtree can be deleted as one unit of work.

pub mod blob;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod tooling;
pub mod tree;
pub mod types;
pub mod views;
