//! Local VM backed by a QEMU process.
//!
//! The guest's SSH port is forwarded to a free port on localhost through
//! user-mode networking, so no host networking privileges are needed. QEMU's
//! console output goes straight to the parent's stdout and stderr. The work
//! directory holding the QMP socket is removed when the VM is dropped.

use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::remote::{CommandRunner, RemoteExecutor, SshEndpoint, StreamingCommandRunner};
use crate::vm::{Vm, VmError, VmFuture};

mod cmdline;
mod firmware;
#[cfg(feature = "qmp")]
pub mod qmp;

pub use cmdline::{AAVMF_FIRMWARE, Arch, ImageFormat, QemuCommandLine};
pub use firmware::{OVMF_CANDIDATES, find_firmware, find_firmware_in};

/// Default guest memory passed to `-m`.
pub const DEFAULT_MEMORY: &str = "2048";

/// Hostname used to reach forwarded guest ports.
const LOCALHOST: &str = "localhost";

/// What `start` waits for before returning.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum WaitMode {
    /// The forwarded SSH port accepts connections.
    #[default]
    Ssh,
    /// QEMU emits the named QMP event, for example `SHUTDOWN`.
    QmpEvent(String),
}

impl FromStr for WaitMode {
    type Err = VmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "ssh" {
            return Ok(Self::Ssh);
        }
        match value.split_once(':') {
            Some(("qmp", event)) if !event.is_empty() && !event.contains(':') => {
                Ok(Self::QmpEvent(event.to_owned()))
            }
            _ => Err(VmError::UnsupportedWaitMode {
                mode: value.to_owned(),
            }),
        }
    }
}

impl fmt::Display for WaitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => f.write_str("ssh"),
            Self::QmpEvent(event) => write!(f, "qmp:{event}"),
        }
    }
}

/// Per-start switches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QemuStart {
    /// Condition to wait for.
    pub wait: WaitMode,
    /// Discard guest writes to the disk image.
    pub snapshot: bool,
    /// Boot `x86_64` guests with OVMF.
    pub use_firmware: bool,
}

impl Default for QemuStart {
    fn default() -> Self {
        Self {
            wait: WaitMode::Ssh,
            snapshot: true,
            use_firmware: false,
        }
    }
}

/// Target description for a QEMU guest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QemuOptions {
    /// Disk image; `.qcow2` or `.img`.
    pub image: Utf8PathBuf,
    /// Guest architecture name; the host architecture when `None`.
    pub arch: Option<String>,
    /// Optional boot ISO.
    pub cdrom: Option<Utf8PathBuf>,
    /// Arguments appended verbatim to the command line.
    pub extra_args: Vec<String>,
    /// Memory size as understood by `-m`.
    pub memory: String,
    /// Open a display window instead of running headless.
    pub gui: bool,
    /// Emulator binary override; `qemu-system-<arch>` when `None`.
    pub binary: Option<String>,
}

impl QemuOptions {
    /// Options for `image` with every other setting at its default.
    #[must_use]
    pub fn new(image: impl Into<Utf8PathBuf>) -> Self {
        Self {
            image: image.into(),
            arch: None,
            cdrom: None,
            extra_args: Vec::new(),
            memory: DEFAULT_MEMORY.to_owned(),
            gui: false,
            binary: None,
        }
    }

    fn resolve_arch(&self) -> Result<Arch, VmError> {
        match self.arch.as_deref() {
            None | Some("") => Arch::host(),
            Some(name) => name.parse(),
        }
    }
}

/// A QEMU guest owned by this process.
#[derive(Debug)]
pub struct QemuVm<R: CommandRunner = StreamingCommandRunner> {
    options: QemuOptions,
    executor: RemoteExecutor<R>,
    workdir: TempDir,
    qmp_socket: Utf8PathBuf,
    child: Option<Child>,
    endpoint: Option<SshEndpoint>,
}

impl<R: CommandRunner> QemuVm<R> {
    /// Creates a stopped VM and its private work directory.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Io`] when the work directory cannot be created.
    pub fn new(options: QemuOptions, executor: RemoteExecutor<R>) -> Result<Self, VmError> {
        let image_name = options.image.file_name().unwrap_or("image");
        let workdir = tempfile::Builder::new()
            .prefix("vmtest-")
            .suffix(&format!("-{image_name}"))
            .tempdir()?;
        let qmp_socket = Utf8Path::from_path(workdir.path())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("non UTF-8 work directory {}", workdir.path().display()),
                )
            })?
            .join("qmp.socket");

        Ok(Self {
            options,
            executor,
            workdir,
            qmp_socket,
            child: None,
            endpoint: None,
        })
    }

    /// Path of the QMP control socket.
    #[must_use]
    pub fn qmp_socket_path(&self) -> &Utf8Path {
        &self.qmp_socket
    }

    /// Private work directory, removed on drop.
    #[must_use]
    pub fn workdir(&self) -> &std::path::Path {
        self.workdir.path()
    }

    /// Host port forwarded to the guest's SSH port while running.
    #[must_use]
    pub fn ssh_port(&self) -> Option<u16> {
        self.endpoint.as_ref().map(|endpoint| endpoint.port)
    }

    /// Boots the guest and waits as requested by `start`.
    ///
    /// Returns immediately when the process is already running. When the
    /// wait fails the process is killed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns configuration errors ([`VmError::UnsupportedArchitecture`],
    /// [`VmError::UnsupportedImageFormat`], [`VmError::FirmwareNotFound`])
    /// before anything is spawned, [`VmError::Spawn`] when QEMU cannot start,
    /// and readiness or QMP errors from the wait.
    pub async fn start_with(&mut self, start: QemuStart) -> Result<(), VmError> {
        if self.running() {
            return Ok(());
        }

        let arch = self.options.resolve_arch()?;
        let firmware = if start.use_firmware && arch == Arch::X86_64 {
            Some(find_firmware()?)
        } else {
            None
        };
        let port = free_port()?;
        let cmdline = QemuCommandLine {
            arch,
            image: &self.options.image,
            memory: &self.options.memory,
            ssh_port: port,
            qmp_socket: &self.qmp_socket,
            cdrom: self.options.cdrom.as_deref(),
            firmware: firmware.as_deref(),
            snapshot: start.snapshot,
            gui: self.options.gui,
            extra_args: &self.options.extra_args,
        };
        let args = cmdline.args()?;
        let program = self
            .options
            .binary
            .clone()
            .unwrap_or_else(|| cmdline.program());

        info!("QEMU: {program} {}", args.join(" "));
        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| VmError::Spawn {
                program: program.clone(),
                source,
            })?;
        self.child = Some(child);
        self.endpoint = Some(SshEndpoint::new(LOCALHOST, port));

        if let Err(err) = self.wait_for(&start.wait).await {
            self.kill_child();
            return Err(err);
        }
        match &start.wait {
            WaitMode::Ssh => info!(port, "vm ready at port {port}"),
            WaitMode::QmpEvent(event) => info!(event = %event, "qmp event {event}"),
        }
        Ok(())
    }

    async fn wait_for(&self, wait: &WaitMode) -> Result<(), VmError> {
        match wait {
            WaitMode::Ssh => self.wait_ssh_ready().await,
            WaitMode::QmpEvent(event) => self.wait_qmp_event(event).await,
        }
    }

    #[cfg(feature = "qmp")]
    async fn wait_qmp_event(&self, event: &str) -> Result<(), VmError> {
        qmp::wait_for_event(&self.qmp_socket, event).await
    }

    #[cfg(not(feature = "qmp"))]
    #[expect(
        clippy::unused_async,
        clippy::unused_self,
        reason = "mirrors the signature of the qmp-enabled variant"
    )]
    async fn wait_qmp_event(&self, event: &str) -> Result<(), VmError> {
        Err(VmError::EventWaitUnavailable {
            event: event.to_owned(),
        })
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                debug!(error = %err, "qemu already exited");
            }
            if let Err(err) = child.wait() {
                warn!(error = %err, "failed to reap qemu");
            }
        }
        self.endpoint = None;
    }
}

impl<R: CommandRunner> Vm for QemuVm<R> {
    type Runner = R;

    fn start(&mut self) -> VmFuture<'_, ()> {
        Box::pin(self.start_with(QemuStart::default()))
    }

    fn force_stop(&mut self) -> VmFuture<'_, ()> {
        Box::pin(async move {
            self.kill_child();
            Ok(())
        })
    }

    fn running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        matches!(child.try_wait(), Ok(None))
    }

    fn endpoint(&self) -> Option<SshEndpoint> {
        self.endpoint.clone()
    }

    fn executor(&self) -> &RemoteExecutor<R> {
        &self.executor
    }
}

impl<R: CommandRunner> Drop for QemuVm<R> {
    fn drop(&mut self) {
        self.kill_child();
    }
}

/// Returns a currently unused TCP port on the loopback interface.
///
/// # Errors
///
/// Returns [`VmError::Io`] when binding fails.
pub fn free_port() -> Result<u16, VmError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests;
