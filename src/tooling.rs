//! Tooling & Integration Layer
//!
//! Command-line access to every catalog operation, scoped to one workspace.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
