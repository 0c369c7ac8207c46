//! Command-line host for `lumen-core`.
//!
//! The binary owns the callback context: results are queued by the loader and
//! run on the main task, the way a UI thread would drain them.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Command};
