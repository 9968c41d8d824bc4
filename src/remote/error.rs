//! Error type for remote execution.

use thiserror::Error;

/// Errors surfaced while running commands or copying files over SSH.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set VMTEST_SSH_{env_suffix} or add {field} to [ssh] in vmtest.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when the client binary cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the SSH session itself could not be established.
    #[error("cannot connect to {host}:{port}: {output}")]
    Connection {
        /// Remote host.
        host: String,
        /// Remote SSH port.
        port: u16,
        /// Output captured from the client.
        output: String,
    },
    /// Raised when the remote command exits non-zero.
    #[error("command '{command}' returned non-zero exit status {status_text}")]
    CommandFailed {
        /// Command as transmitted to the remote shell.
        command: String,
        /// Exit code reported by the client, `None` when killed by a signal.
        exit_code: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Combined stdout and stderr captured while the command ran.
        output: String,
    },
}

impl RemoteError {
    /// Returns the captured output for failures that carry any.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Connection { output, .. } | Self::CommandFailed { output, .. } => Some(output),
            Self::InvalidConfig { .. } | Self::Spawn { .. } => None,
        }
    }
}
