//! Unified error type for the burrow workspace.
//!
//! Library crates return [`BurrowError`]; the CLI wraps it in `anyhow` at
//! the edge.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BurrowError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or user input is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The operation is not allowed in the resource's current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated precondition.
        message: String,
    },

    /// A privileged system call was refused or failed.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {message}")]
    Command {
        /// The command line that was run.
        command: String,
        /// Exit status and captured stderr.
        message: String,
    },

    /// An external command did not finish in time and was killed.
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout {
        /// The command line that was run.
        command: String,
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// No free address is left in a subnet.
    #[error("no free address left in subnet {subnet}")]
    AddressExhausted {
        /// The exhausted subnet in CIDR notation.
        subnet: String,
    },

    /// A persisted document failed validation.
    #[error("corrupt state in {path}: {message}")]
    Corrupt {
        /// File holding the corrupt document.
        path: PathBuf,
        /// What failed validation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BurrowError {
    /// Builds an [`BurrowError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`BurrowError::PermissionDenied`] from a failed syscall.
    pub fn syscall(what: impl std::fmt::Display, errno: impl std::fmt::Display) -> Self {
        Self::PermissionDenied {
            message: format!("{what}: {errno}"),
        }
    }

    /// Returns `true` if this error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BurrowError>;
