//! Remote command execution and file copy over the system SSH client.
//!
//! Every invocation uses the same non-interactive option set, which suits
//! disposable test machines only: host keys are neither checked nor
//! persisted, client chatter is suppressed, and the SSH agent is bypassed so
//! that only explicitly supplied keys are offered.

use std::ffi::OsString;

use camino::Utf8Path;
use tracing::info;

use crate::backend::InstanceNetworking;

mod command;
mod config;
mod credential;
mod error;
mod types;
mod util;

pub use command::RemoteCommand;
pub use config::{SshConfig, SshConfigLoadError};
pub use credential::{Credential, Login};
pub use error::RemoteError;
pub use types::{CommandOutput, CommandRunner, StreamingCommandRunner};
pub use util::expand_tilde;

/// Exit status `ssh` reserves for its own failures.
pub const SSH_CONNECTION_FAILURE: i32 = 255;

const NON_INTERACTIVE_OPTIONS: [&str; 4] = [
    "UserKnownHostsFile=/dev/null",
    "StrictHostKeyChecking=no",
    "LogLevel=ERROR",
    "IdentitiesOnly=yes",
];

/// Address and port of a guest's SSH server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshEndpoint {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl SshEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<&InstanceNetworking> for SshEndpoint {
    fn from(networking: &InstanceNetworking) -> Self {
        Self::new(networking.public_ip.to_string(), networking.ssh_port)
    }
}

/// Wraps `ssh`/`scp` invocations and maps their exit status onto
/// [`RemoteError`].
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl RemoteExecutor<StreamingCommandRunner> {
    /// Convenience constructor that wires the streaming process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: SshConfig) -> Result<Self, RemoteError> {
        Self::new(config, StreamingCommandRunner)
    }
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates a new executor using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Runs `command` on the guest and returns its merged output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Connection`] when the session cannot be
    /// established, [`RemoteError::CommandFailed`] when the command exits
    /// non-zero, and [`RemoteError::Spawn`] when the client cannot start.
    pub fn execute(
        &self,
        endpoint: &SshEndpoint,
        login: &Login,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteError> {
        let rendered = command.render();
        let (program, args) = self.build_ssh_args(endpoint, login, &rendered);
        let output = self.runner.run(&program, &args)?;
        check_status(endpoint, rendered, output)
    }

    /// Copies `local_path` to `remote_path` on the guest.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`RemoteExecutor::execute`].
    pub fn copy(
        &self,
        endpoint: &SshEndpoint,
        login: &Login,
        local_path: &Utf8Path,
        remote_path: &str,
    ) -> Result<(), RemoteError> {
        let (program, args) = self.build_scp_args(endpoint, login, local_path, remote_path);
        info!(src = %local_path, dst = remote_path, "copying file to guest");
        let output = self.runner.run(&program, &args)?;
        let command = format!(
            "{} {local_path} {}@{}:{remote_path}",
            self.config.scp_bin, login.user, endpoint.host
        );
        check_status(endpoint, command, output).map(drop)
    }

    fn build_ssh_args(
        &self,
        endpoint: &SshEndpoint,
        login: &Login,
        remote_command: &str,
    ) -> (String, Vec<OsString>) {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(endpoint.port.to_string()),
        ];
        args.extend(common_options(login));
        args.push(OsString::from(format!("{}@{}", login.user, endpoint.host)));
        args.push(OsString::from(remote_command));
        self.with_password_prefix(&self.config.ssh_bin, login, args)
    }

    fn build_scp_args(
        &self,
        endpoint: &SshEndpoint,
        login: &Login,
        local_path: &Utf8Path,
        remote_path: &str,
    ) -> (String, Vec<OsString>) {
        let mut args = vec![
            OsString::from("-P"),
            OsString::from(endpoint.port.to_string()),
        ];
        args.extend(common_options(login));
        args.push(OsString::from(local_path.as_str()));
        args.push(OsString::from(format!(
            "{}@{}:{remote_path}",
            login.user, endpoint.host
        )));
        self.with_password_prefix(&self.config.scp_bin, login, args)
    }

    fn with_password_prefix(
        &self,
        client: &str,
        login: &Login,
        args: Vec<OsString>,
    ) -> (String, Vec<OsString>) {
        let Some(password) = login.password() else {
            return (client.to_owned(), args);
        };
        let mut prefixed = Vec::with_capacity(args.len() + 3);
        prefixed.push(OsString::from("-p"));
        prefixed.push(OsString::from(password));
        prefixed.push(OsString::from(client));
        prefixed.extend(args);
        (self.config.sshpass_bin.clone(), prefixed)
    }
}

fn common_options(login: &Login) -> Vec<OsString> {
    let mut args = Vec::with_capacity(NON_INTERACTIVE_OPTIONS.len() * 2 + 2);
    for option in NON_INTERACTIVE_OPTIONS {
        args.push(OsString::from("-o"));
        args.push(OsString::from(option));
    }
    if let Some(key_file) = login.key_file() {
        args.push(OsString::from("-i"));
        args.push(OsString::from(expand_tilde(key_file.as_str())));
    }
    args
}

fn check_status(
    endpoint: &SshEndpoint,
    command: String,
    output: CommandOutput,
) -> Result<CommandOutput, RemoteError> {
    if output.is_success() {
        return Ok(output);
    }
    match output.code {
        Some(SSH_CONNECTION_FAILURE) => Err(RemoteError::Connection {
            host: endpoint.host.clone(),
            port: endpoint.port,
            output: output.output,
        }),
        code => Err(RemoteError::CommandFailed {
            command,
            exit_code: code,
            status_text: code.map_or_else(|| String::from("unknown"), |value| value.to_string()),
            output: output.output,
        }),
    }
}

#[cfg(test)]
mod tests;
