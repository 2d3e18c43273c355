//! Local execution substrate.
//!
//! Performs filesystem operations with `tokio::fs` and spawns processes with
//! `tokio::process`. Every host name is treated as an alias of the local
//! filesystem, which is how compute nodes sharing a parallel filesystem see
//! the run tree.

use std::collections::VecDeque;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{command_line, Location, RunOptions, Substrate};
use crate::error::RunError;

/// Number of output lines attached to an execution error.
const TAIL_LINES: usize = 20;

/// Substrate operating on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalSubstrate;

impl LocalSubstrate {
    /// Creates a new local substrate.
    pub fn new() -> Self {
        Self
    }
}

fn io_error(operation: &str, location: &Location, err: io::Error) -> RunError {
    RunError::staging(format!("{} `{}`: {}", operation, location, err))
}

#[async_trait]
impl Substrate for LocalSubstrate {
    async fn exists(&self, location: &Location) -> Result<bool, RunError> {
        tokio::fs::try_exists(location.path())
            .await
            .map_err(|e| io_error("cannot stat", location, e))
    }

    async fn is_file(&self, location: &Location) -> Result<bool, RunError> {
        match tokio::fs::metadata(location.path()).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("cannot stat", location, e)),
        }
    }

    async fn mkdir(&self, location: &Location) -> Result<(), RunError> {
        debug!(location = %location, "mkdir");
        tokio::fs::create_dir_all(location.path())
            .await
            .map_err(|e| io_error("cannot create directory", location, e))
    }

    async fn link(&self, src: &Location, dst: &Location) -> Result<(), RunError> {
        debug!(src = %src, dst = %dst, "link");
        tokio::fs::symlink(src.path(), dst.path())
            .await
            .map_err(|e| RunError::staging(format!("cannot link `{}` to `{}`: {}", src, dst, e)))
    }

    async fn copy(&self, src: &Location, dst: &Location) -> Result<(), RunError> {
        debug!(src = %src, dst = %dst, "copy");
        tokio::fs::copy(src.path(), dst.path())
            .await
            .map(|_| ())
            .map_err(|e| RunError::staging(format!("cannot copy `{}` to `{}`: {}", src, dst, e)))
    }

    async fn read_text(&self, location: &Location) -> Result<String, RunError> {
        tokio::fs::read_to_string(location.path())
            .await
            .map_err(|e| io_error("cannot read", location, e))
    }

    async fn write_text(&self, location: &Location, text: &str) -> Result<(), RunError> {
        debug!(location = %location, bytes = text.len(), "write");
        tokio::fs::write(location.path(), text)
            .await
            .map_err(|e| io_error("cannot write", location, e))
    }

    async fn list_dir(&self, location: &Location) -> Result<Vec<Location>, RunError> {
        let mut entries = tokio::fs::read_dir(location.path())
            .await
            .map_err(|e| io_error("cannot list", location, e))?;

        let mut result = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("cannot list", location, e))?
        {
            result.push(location.join(entry.file_name()));
        }
        result.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(result)
    }

    async fn remove_dir(&self, location: &Location) -> Result<(), RunError> {
        info!(location = %location, "Removing directory");
        tokio::fs::remove_dir_all(location.path())
            .await
            .map_err(|e| io_error("cannot remove", location, e))
    }

    async fn run(
        &self,
        host: &str,
        program: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<(), RunError> {
        let cmdline = command_line(program, args);
        let log_file = options.resolved_log_file();

        // A stale log from a previous attempt would be reported as ours.
        if let Some(log) = &log_file {
            match tokio::fs::remove_file(log).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(RunError::staging(format!(
                        "cannot remove stale log `{}`: {}",
                        log.display(),
                        e
                    )))
                }
            }
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&options.cwd)
            .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(host, cwd = %options.cwd.display(), command = %cmdline, "Running process");

        let mut child = cmd
            .spawn()
            .map_err(|e| RunError::execution(&cmdline, format!("cannot start process: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out_tail, err_tail, status) = tokio::join!(
            drain_lines(stdout, program, "stdout"),
            drain_lines(stderr, program, "stderr"),
            child.wait()
        );

        let status = status
            .map_err(|e| RunError::execution(&cmdline, format!("cannot wait for process: {}", e)))?;

        if status.success() {
            debug!(command = %cmdline, "Process completed");
            return Ok(());
        }

        let mut tail = match &log_file {
            Some(log) => read_tail(log).await,
            None => VecDeque::new(),
        };
        if tail.is_empty() {
            tail = if err_tail.is_empty() { out_tail } else { err_tail };
        }

        let mut reason = format!("process {} (cwd `{}`)", status, options.cwd.display());
        if !tail.is_empty() {
            reason.push('\n');
            reason.push_str(&tail.into_iter().collect::<Vec<_>>().join("\n"));
        }
        Err(RunError::execution(cmdline, reason))
    }
}

/// Forwards every line of a child stream to the log, keeping the last ones.
async fn drain_lines<R>(reader: Option<R>, program: &str, stream: &'static str) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    let Some(reader) = reader else {
        return tail;
    };

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(program, stream, "{}", line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

async fn read_tail(path: &std::path::Path) -> VecDeque<String> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return VecDeque::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let skip = lines.len().saturating_sub(TAIL_LINES);
    lines[skip..].iter().map(|l| l.to_string()).collect()
}
