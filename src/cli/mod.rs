//! Command-line interface for wrfda-runner.
//!
//! Provides commands to run the pipeline for one or more dates, run single
//! cycle steps, and clean up date working directories.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, DatasetArg, PhaseArg};
