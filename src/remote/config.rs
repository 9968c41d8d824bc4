//! SSH client and readiness settings.
//!
//! [`SshConfig`] is loaded via `ortho-config`, which merges defaults,
//! configuration files, and environment variables.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poller::{ReachabilityPolicy, ReadinessConfig, RetryPolicy};

use super::RemoteError;

/// SSH client binaries and readiness budgets.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VMTEST_SSH",
    discovery(
        app_name = "vmtest",
        env_var = "VMTEST_CONFIG_PATH",
        config_file_name = "vmtest.toml",
        dotfile_name = ".vmtest.toml",
        project_file_name = "vmtest.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `sshpass` executable, used only for password logins.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Attempts of the no-op check before a remote operation gives up.
    #[ortho_config(default = 30)]
    pub ready_retries: u32,
    /// Seconds to wait after each failed check.
    #[ortho_config(default = 10)]
    pub ready_retry_delay_secs: u64,
    /// Seconds to wait for the SSH port to accept connections after boot.
    #[ortho_config(default = 600)]
    pub reachability_timeout_secs: u64,
    /// Seconds between connection attempts while waiting for the port.
    #[ortho_config(default = 1)]
    pub reachability_poll_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            sshpass_bin: String::from("sshpass"),
            ready_retries: RetryPolicy::SSH_READY.max_retries,
            ready_retry_delay_secs: RetryPolicy::SSH_READY.retry_delay.as_secs(),
            reachability_timeout_secs: ReachabilityPolicy::default().max_wait.as_secs(),
            reachability_poll_secs: ReachabilityPolicy::default().poll_interval.as_secs(),
        }
    }
}

/// Errors raised when loading the SSH configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl SshConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when a binary path is empty or
    /// the retry budget is zero.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.sshpass_bin, "sshpass_bin")?;
        if self.ready_retries == 0 {
            return Err(RemoteError::InvalidConfig {
                field: String::from("ready_retries"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables, ignoring process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("vmtest")])
            .map_err(|err| SshConfigLoadError::Parse(err.to_string()))
    }

    /// Readiness budgets derived from this configuration.
    #[must_use]
    pub const fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig {
            ssh: RetryPolicy {
                max_retries: self.ready_retries,
                retry_delay: Duration::from_secs(self.ready_retry_delay_secs),
            },
            reachability: ReachabilityPolicy {
                poll_interval: Duration::from_secs(self.reachability_poll_secs),
                max_wait: Duration::from_secs(self.reachability_timeout_secs),
            },
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        if value.trim().is_empty() {
            return Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}
