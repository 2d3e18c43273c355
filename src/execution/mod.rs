//! Execution layer for wrfda-runner.
//!
//! Every filesystem and process operation of a run goes through a
//! [`Substrate`], addressed by [`Location`]s (a host name plus a path). The
//! orchestrator never talks to a substrate directly: it wraps one in an
//! [`ExecContext`], which enforces the sticky first-error discipline.
//!
//! # Architecture
//!
//! ```text
//! stage builders / runners → ExecContext (sticky error) → Substrate → host
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wrfda_runner::execution::{ExecContext, LocalSubstrate, Location, RunOptions};
//!
//! let ctx = ExecContext::new(Arc::new(LocalSubstrate::new()));
//! let dir = Location::local("/runs/20200715/wps");
//!
//! ctx.mkdir(&dir).await;
//! ctx.write_text(&dir.join("namelist.wps"), "&share\n/\n").await;
//! ctx.run("localhost", "./geogrid.exe", &[], &RunOptions::new(dir.path())).await;
//!
//! ctx.result()?;
//! ```

pub mod context;
pub mod local;

pub use context::ExecContext;
pub use local::LocalSubstrate;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::RunError;

/// Host name used when no compute host is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// A path on a named host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    host: String,
    path: PathBuf,
}

impl Location {
    /// Creates a location for `path` on `host`.
    pub fn new(host: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Creates a location on the default local host.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(DEFAULT_HOST, path)
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the path on the host.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a location for `part` below this one, on the same host.
    pub fn join(&self, part: impl AsRef<Path>) -> Self {
        Self {
            host: self.host.clone(),
            path: self.path.join(part),
        }
    }

    /// Returns the same path addressed on another host.
    pub fn on_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: self.path.clone(),
        }
    }

    /// Returns another path addressed on the same host.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            host: self.host.clone(),
            path: path.into(),
        }
    }

    /// Returns the last component of the path, if any.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path.display())
    }
}

/// Options for running an external process.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory of the process.
    pub cwd: PathBuf,
    /// Log file the process writes on its own (e.g. `rsl.out.0000`),
    /// relative to `cwd` or absolute.
    pub log_file: Option<PathBuf>,
    /// Environment variables added to the process environment.
    pub env: Vec<(String, String)>,
}

impl RunOptions {
    /// Creates options running in the given working directory.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            log_file: None,
            env: Vec::new(),
        }
    }

    /// Sets the log file written by the process.
    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }

    /// Adds environment variables.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Returns the log file path resolved against the working directory.
    pub fn resolved_log_file(&self) -> Option<PathBuf> {
        self.log_file.as_ref().map(|log| self.cwd.join(log))
    }
}

/// Filesystem and process operations against named hosts.
///
/// Implementations report failures as [`RunError`]s: filesystem failures are
/// staging errors, process launch failures and non-zero exits are execution
/// errors.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Checks whether a location exists. Non-existence is `Ok(false)`.
    async fn exists(&self, location: &Location) -> Result<bool, RunError>;

    /// Checks whether a location is a regular file.
    async fn is_file(&self, location: &Location) -> Result<bool, RunError>;

    /// Creates a directory and any missing parent.
    async fn mkdir(&self, location: &Location) -> Result<(), RunError>;

    /// Creates a symbolic link at `dst` pointing to `src`.
    async fn link(&self, src: &Location, dst: &Location) -> Result<(), RunError>;

    /// Copies the file at `src` to `dst`, replacing `dst` if present.
    async fn copy(&self, src: &Location, dst: &Location) -> Result<(), RunError>;

    /// Reads a text file.
    async fn read_text(&self, location: &Location) -> Result<String, RunError>;

    /// Writes a text file, replacing it if present.
    async fn write_text(&self, location: &Location, text: &str) -> Result<(), RunError>;

    /// Lists the entries of a directory, sorted by name.
    async fn list_dir(&self, location: &Location) -> Result<Vec<Location>, RunError>;

    /// Removes a directory and everything below it.
    async fn remove_dir(&self, location: &Location) -> Result<(), RunError>;

    /// Runs `program` with `args` on `host`, returning once it exited.
    async fn run(
        &self,
        host: &str,
        program: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<(), RunError>;
}

/// Formats a command line for logs and error messages.
pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
