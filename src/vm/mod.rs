//! The disposable VM abstraction shared by the emulator and cloud backends.
//!
//! Implementors provide the lifecycle primitives ([`Vm::start`],
//! [`Vm::force_stop`], [`Vm::running`]) plus the connection details; the
//! trait derives everything a test harness needs on top of them. Running a
//! command or copying a file first starts the VM if necessary, then waits for
//! SSH to accept a no-op command before delegating to the
//! [`RemoteExecutor`].
//!
//! Use [`with_vm`] to scope a VM so teardown always runs.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::poller::{ReadinessConfig, ReadinessError, ensure_ready, wait_port_open};
use crate::remote::{
    CommandOutput, CommandRunner, Login, RemoteCommand, RemoteError, RemoteExecutor, SshEndpoint,
};

pub mod cloud;
pub mod qemu;

pub use cloud::CloudVm;
pub use qemu::{Arch, ImageFormat, QemuOptions, QemuStart, QemuVm, WaitMode};

/// Future returned by VM operations.
pub type VmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VmError>> + 'a>>;

/// Boxed provider error carried through [`VmError::Provider`].
pub type ProviderError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by VM lifecycle and remote operations.
#[derive(Debug, Error)]
pub enum VmError {
    /// Raised when the requested guest architecture has no known topology.
    #[error("unsupported architecture {arch}")]
    UnsupportedArchitecture {
        /// Architecture as requested.
        arch: String,
    },
    /// Raised when the disk image extension is neither `.qcow2` nor `.img`.
    #[error("unsupported image extension: {path}. Must be .qcow2 or .img")]
    UnsupportedImageFormat {
        /// Offending image path.
        path: Utf8PathBuf,
    },
    /// Raised when UEFI firmware was requested but none is installed.
    #[error("cannot find OVMF firmware; looked in {}", candidates.join(", "))]
    FirmwareNotFound {
        /// Locations that were tried.
        candidates: Vec<String>,
    },
    /// Raised for a wait mode other than `ssh` or `qmp:<EVENT>`.
    #[error("unsupported wait mode {mode}")]
    UnsupportedWaitMode {
        /// Mode as requested.
        mode: String,
    },
    /// Raised when an operation needs an address but the VM is not running.
    #[error("vm is not running")]
    NotStarted,
    /// Raised when the guest never became reachable.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    /// Raised by the remote executor.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Raised by the cloud provider; the original error is kept intact.
    #[error("provider error: {0}")]
    Provider(#[source] ProviderError),
    /// Raised when the emulator process cannot be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// Raised for local I/O failures such as creating the work directory.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Raised when the QMP conversation fails.
    #[error("qmp: {0}")]
    Qmp(String),
    /// Raised when QEMU never created its QMP socket.
    #[error("no {path} after {waited_secs} seconds")]
    QmpSocketTimeout {
        /// Socket path that was expected.
        path: Utf8PathBuf,
        /// Seconds spent waiting.
        waited_secs: u64,
    },
    /// Raised when a QMP wait is requested in a build without QMP support.
    #[error("waiting for qmp event {event} requires the `qmp` feature")]
    EventWaitUnavailable {
        /// Event that was requested.
        event: String,
    },
}

impl VmError {
    /// Wraps a provider error without altering it.
    pub fn provider(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Provider(Box::new(err))
    }

    /// Returns the provider error when it has type `E`.
    #[must_use]
    pub fn provider_error<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Provider(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A disposable machine reachable over SSH.
pub trait Vm {
    /// Runner used by the remote executor.
    type Runner: CommandRunner;

    /// Boots the VM. Returns immediately when it is already running.
    fn start(&mut self) -> VmFuture<'_, ()>;

    /// Releases every resource the VM owns and forgets its address.
    ///
    /// Safe to call any number of times.
    fn force_stop(&mut self) -> VmFuture<'_, ()>;

    /// Reports whether the VM is currently alive.
    fn running(&mut self) -> bool;

    /// SSH endpoint, available once the VM has started.
    fn endpoint(&self) -> Option<SshEndpoint>;

    /// Executor used for commands and copies.
    fn executor(&self) -> &RemoteExecutor<Self::Runner>;

    /// Readiness budgets; defaults to the executor configuration.
    fn readiness(&self) -> ReadinessConfig {
        self.executor().config().readiness()
    }

    /// Waits until the SSH port accepts TCP connections.
    fn wait_ssh_ready(&self) -> VmFuture<'_, ()> {
        Box::pin(async move {
            let endpoint = self.endpoint().ok_or(VmError::NotStarted)?;
            wait_port_open(&endpoint.host, endpoint.port, self.readiness().reachability).await?;
            Ok(())
        })
    }

    /// Retries a no-op command until SSH logins succeed.
    fn ensure_ssh<'a>(&'a self, login: &'a Login) -> VmFuture<'a, ()> {
        Box::pin(async move {
            let endpoint = self.endpoint().ok_or(VmError::NotStarted)?;
            let noop = RemoteCommand::from("true");
            ensure_ready(
                || self.executor().execute(&endpoint, login, &noop),
                self.readiness().ssh,
            )
            .await?;
            Ok(())
        })
    }

    /// Runs `command` on the guest, starting it first if needed.
    ///
    /// A failing remote command is reported once and never retried.
    fn run<'a>(
        &'a mut self,
        command: &'a RemoteCommand,
        login: &'a Login,
    ) -> VmFuture<'a, CommandOutput> {
        Box::pin(async move {
            let endpoint = self.prepare(login).await?;
            Ok(self.executor().execute(&endpoint, login, command)?)
        })
    }

    /// Copies `src` to `dst` on the guest, starting it first if needed.
    fn scp<'a>(&'a mut self, src: &'a Utf8Path, dst: &'a str, login: &'a Login) -> VmFuture<'a, ()> {
        Box::pin(async move {
            let endpoint = self.prepare(login).await?;
            Ok(self.executor().copy(&endpoint, login, src, dst)?)
        })
    }

    /// Starts the VM when needed and waits for SSH logins.
    fn prepare<'a>(&'a mut self, login: &'a Login) -> VmFuture<'a, SshEndpoint> {
        Box::pin(async move {
            if !self.running() {
                self.start().await?;
            }
            self.ensure_ssh(login).await?;
            self.endpoint().ok_or(VmError::NotStarted)
        })
    }
}

/// Runs `body` against `vm` and always tears the VM down afterwards.
///
/// A teardown failure is returned only when `body` succeeded; otherwise it
/// is logged and the body's error wins.
///
/// # Errors
///
/// Returns the body's error, or the teardown error when the body succeeded.
pub async fn with_vm<V, T, F>(mut vm: V, body: F) -> Result<T, VmError>
where
    V: Vm,
    F: AsyncFnOnce(&mut V) -> Result<T, VmError>,
{
    let outcome = body(&mut vm).await;
    let teardown = vm.force_stop().await;
    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
        (Err(err), Err(teardown_err)) => {
            warn!(error = %teardown_err, "teardown failed after an earlier error");
            Err(err)
        }
    }
}
