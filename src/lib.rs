//! wrfda-runner: WPS, WRFDA and WRF pipeline orchestration.
//!
//! This library builds the working directories of a forecast with three
//! cycles of data assimilation, stages the files flowing between its stages,
//! renders namelists, and runs the numerical binaries under a sticky-error
//! execution context.

// Core modules
pub mod batch;
pub mod cli;
pub mod error;
pub mod execution;
pub mod folders;
pub mod namelist;
pub mod pipeline;

// Re-export commonly used types
pub use error::{ErrorKind, RunError};
pub use execution::{ExecContext, LocalSubstrate, Location, RunOptions, Substrate};
pub use pipeline::{Configuration, ForecastRun, Orchestrator};
