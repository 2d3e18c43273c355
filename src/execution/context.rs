//! Sticky-error execution context.
//!
//! An [`ExecContext`] wraps a [`Substrate`] and records the first error of a
//! run. Once an error is recorded every later operation returns immediately
//! without touching the substrate, so stage builders can chain dozens of
//! staging operations and check the outcome once at the stage boundary.
//!
//! The error cell is a [`OnceLock`] shared by every clone of the context:
//! concurrent fan-out tasks race to set it and only the first write is kept.

use std::sync::{Arc, OnceLock};

use tracing::{debug, error};

use super::{command_line, Location, RunOptions, Substrate};
use crate::error::RunError;

/// Per-run handle enforcing first-error-wins semantics.
#[derive(Clone)]
pub struct ExecContext {
    substrate: Arc<dyn Substrate>,
    error: Arc<OnceLock<RunError>>,
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("error", &self.error.get())
            .finish()
    }
}

impl ExecContext {
    /// Creates a context with no recorded error.
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self {
            substrate,
            error: Arc::new(OnceLock::new()),
        }
    }

    /// Returns the recorded error, if any.
    pub fn error(&self) -> Option<&RunError> {
        self.error.get()
    }

    /// Returns true once an error has been recorded.
    pub fn is_failed(&self) -> bool {
        self.error.get().is_some()
    }

    /// Records `err` unless an error was already recorded.
    ///
    /// Returns true if this call recorded the error.
    pub fn fail(&self, err: RunError) -> bool {
        let message = err.to_string();
        match self.error.set(err) {
            Ok(()) => {
                error!(error = %message, "Run failed");
                true
            }
            Err(_) => {
                debug!(error = %message, "Ignoring error after the first one");
                false
            }
        }
    }

    /// Returns the recorded error as a `Result`.
    pub fn result(&self) -> Result<(), RunError> {
        match self.error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record<T>(&self, result: Result<T, RunError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }

    /// Checks whether `location` exists.
    ///
    /// Returns false without recording anything when the location is
    /// missing; only genuine I/O failures are recorded.
    pub async fn exists(&self, location: &Location) -> bool {
        if self.is_failed() {
            return false;
        }
        self.record(self.substrate.exists(location).await)
            .unwrap_or(false)
    }

    /// Checks whether `location` is a regular file.
    pub async fn is_file(&self, location: &Location) -> bool {
        if self.is_failed() {
            return false;
        }
        self.record(self.substrate.is_file(location).await)
            .unwrap_or(false)
    }

    /// Creates a directory (and its parents).
    pub async fn mkdir(&self, location: &Location) {
        if self.is_failed() {
            return;
        }
        self.record(self.substrate.mkdir(location).await);
    }

    /// Creates a symbolic link at `dst` pointing to `src`.
    pub async fn link(&self, src: &Location, dst: &Location) {
        if self.is_failed() {
            return;
        }
        self.record(self.substrate.link(src, dst).await);
    }

    /// Copies `src` to `dst`.
    pub async fn copy(&self, src: &Location, dst: &Location) {
        if self.is_failed() {
            return;
        }
        self.record(self.substrate.copy(src, dst).await);
    }

    /// Reads a text file; `None` if the context failed (now or before).
    pub async fn read_text(&self, location: &Location) -> Option<String> {
        if self.is_failed() {
            return None;
        }
        self.record(self.substrate.read_text(location).await)
    }

    /// Reads a text file, leaving the classification of a failure to the
    /// caller. Nothing is recorded.
    pub async fn try_read_text(&self, location: &Location) -> Result<String, RunError> {
        self.result()?;
        self.substrate.read_text(location).await
    }

    /// Writes a text file.
    pub async fn write_text(&self, location: &Location, text: &str) {
        if self.is_failed() {
            return;
        }
        self.record(self.substrate.write_text(location, text).await);
    }

    /// Lists a directory; empty if the context failed.
    pub async fn list_dir(&self, location: &Location) -> Vec<Location> {
        if self.is_failed() {
            return Vec::new();
        }
        self.record(self.substrate.list_dir(location).await)
            .unwrap_or_default()
    }

    /// Removes a directory tree.
    pub async fn remove_dir(&self, location: &Location) {
        if self.is_failed() {
            return;
        }
        self.record(self.substrate.remove_dir(location).await);
    }

    /// Runs an external process on `host` and waits for it to exit.
    pub async fn run(&self, host: &str, program: &str, args: &[String], options: &RunOptions) {
        if self.is_failed() {
            debug!(command = %command_line(program, args), "Skipping process after failure");
            return;
        }
        self.record(self.substrate.run(host, program, args, options).await);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::execution::LocalSubstrate;
    use tempfile::TempDir;

    fn context() -> ExecContext {
        ExecContext::new(Arc::new(LocalSubstrate::new()))
    }

    #[tokio::test]
    async fn test_operations_after_failure_have_no_effect() {
        let tmp = TempDir::new().unwrap();
        let root = Location::local(tmp.path());
        let ctx = context();

        ctx.mkdir(&root.join("da09_d01")).await;
        ctx.write_text(&root.join("da09_d01/namelist.input"), "&wrfvar1\n/\n")
            .await;
        assert!(ctx.result().is_ok());

        // fails: the staged boundary is missing
        ctx.copy(&root.join("inputs/wrfbdy_d01_da01"), &root.join("da09_d01/wrfbdy_d01"))
            .await;
        let first = ctx.error().cloned().expect("copy should fail");
        assert_eq!(first.kind(), ErrorKind::Staging);

        ctx.mkdir(&root.join("wrf09")).await;
        ctx.write_text(&root.join("da09_d01/parame.in"), "x").await;
        ctx.link(&root.join("da09_d01/namelist.input"), &root.join("nl")).await;
        ctx.copy(&root.join("da09_d01/namelist.input"), &root.join("copy"))
            .await;
        ctx.run("localhost", "false", &[], &RunOptions::new(tmp.path()))
            .await;

        assert!(!tmp.path().join("wrf09").exists());
        assert!(!tmp.path().join("da09_d01/parame.in").exists());
        assert!(!tmp.path().join("nl").exists());
        assert!(!tmp.path().join("copy").exists());
        assert_eq!(ctx.result(), Err(first));
    }

    #[tokio::test]
    async fn test_exists_does_not_record_missing() {
        let tmp = TempDir::new().unwrap();
        let ctx = context();
        assert!(!ctx.exists(&Location::local(tmp.path().join("wps"))).await);
        assert!(ctx.result().is_ok());
    }

    #[tokio::test]
    async fn test_reads_return_nothing_after_failure() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("namelist.wps"), "max_dom = 3,\n").unwrap();
        let ctx = context();
        ctx.fail(RunError::config("boom"));

        assert_eq!(ctx.read_text(&Location::local(tmp.path().join("namelist.wps"))).await, None);
        assert!(ctx.list_dir(&Location::local(tmp.path())).await.is_empty());
        assert!(!ctx.exists(&Location::local(tmp.path())).await);
    }

    #[tokio::test]
    async fn test_try_read_text_does_not_record() {
        let tmp = TempDir::new().unwrap();
        let ctx = context();
        let missing = Location::local(tmp.path().join("namelist.wps"));

        assert!(ctx.try_read_text(&missing).await.is_err());
        assert!(ctx.result().is_ok());

        ctx.fail(RunError::config("boom"));
        assert_eq!(ctx.try_read_text(&missing).await, Err(RunError::config("boom")));
    }

    #[tokio::test]
    async fn test_first_error_wins_across_tasks() {
        let ctx = context();
        let mut handles = Vec::new();
        for i in 0..16 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                ctx.fail(RunError::staging(format!("domain {}", i)))
            }));
        }

        let mut recorded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                recorded += 1;
            }
        }

        assert_eq!(recorded, 1);
        let err = ctx.error().unwrap();
        assert!(err.to_string().starts_with("staging error: domain "));
    }

    #[tokio::test]
    async fn test_failed_process_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let ctx = context();
        ctx.run("localhost", "false", &[], &RunOptions::new(tmp.path()))
            .await;
        assert_eq!(ctx.error().map(RunError::kind), Some(ErrorKind::Execution));
    }
}
