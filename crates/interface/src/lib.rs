//! nodemesh Interface - command line layer
//!
//! Responsibilities:
//! - CLI parsing and command dispatch
//! - Tracing subscriber setup
//! - Output formatting

pub mod cli;


pub use cli::{CliError, OutputFormat, run_cli};
