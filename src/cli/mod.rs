//! Command-line interface for xentbench.
//!
//! Provides commands for expanding, running, and re-aggregating cross-
//! entropy game benchmarks.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
