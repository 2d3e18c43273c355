//! Error types for wrfda-runner operations.
//!
//! Every staging or execution step of a run reports failures as a
//! [`RunError`]. The three categories of the taxonomy are:
//! - configuration errors (unreadable or malformed configuration, namelists
//!   or domain-count declarations)
//! - staging errors (filesystem failures, missing inputs, directory conflicts)
//! - execution errors (external processes failing to launch or exiting
//!   with a non-zero status)

use thiserror::Error;

/// Category of a [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Staging,
    Execution,
}

/// Errors recorded by an execution context during a run.
///
/// The type is `Clone` so that the first recorded error can be kept in a
/// shared cell and handed back to every caller that asks for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("staging error: {0}")]
    Staging(String),

    #[error("working directory `{location}` already exists for {stage}")]
    Conflict { location: String, stage: String },

    #[error("execution of `{command}` failed: {reason}")]
    Execution { command: String, reason: String },
}

impl RunError {
    /// Builds a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Builds a staging error.
    pub fn staging(message: impl Into<String>) -> Self {
        Self::Staging(message.into())
    }

    /// Builds a directory conflict error for the given stage.
    pub fn conflict(location: impl ToString, stage: impl Into<String>) -> Self {
        Self::Conflict {
            location: location.to_string(),
            stage: stage.into(),
        }
    }

    /// Builds an execution error for the given command line.
    pub fn execution(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Returns the taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Staging(_) | Self::Conflict { .. } => ErrorKind::Staging,
            Self::Execution { .. } => ErrorKind::Execution,
        }
    }
}
