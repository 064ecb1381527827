//! Integration tests for the Arbor resource catalog

mod cli_contracts;
mod delete_failures;
mod disk_catalog;
pub mod support;
mod tree_invariants;
mod upload_failures;
