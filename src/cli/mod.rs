//! Command-line interface definitions for the `vmtest` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! only depends on `clap`; values are converted into library types by the
//! binary.

use clap::{Args, Parser};

/// Top-level CLI for the `vmtest` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vmtest",
    about = "Boot a throwaway VM, run commands over SSH, and tear it down",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Boot a local disk image under QEMU.
    #[command(name = "qemu", about = "Boot a local disk image under QEMU")]
    Qemu(QemuCommand),
    /// Provision a Scaleway instance.
    #[command(name = "cloud", about = "Provision a Scaleway instance")]
    Cloud(CloudCommand),
}

/// Arguments for the `vmtest qemu` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct QemuCommand {
    /// Disk image to boot (`.qcow2` or `.img`).
    #[arg(value_name = "IMAGE")]
    pub(crate) image: String,
    /// Guest architecture; defaults to the host architecture.
    #[arg(long, value_name = "ARCH")]
    pub(crate) arch: Option<String>,
    /// Guest memory as understood by QEMU's `-m`.
    #[arg(long, value_name = "SIZE", default_value = "2048")]
    pub(crate) memory: String,
    /// Boot ISO attached as a CD-ROM.
    #[arg(long, value_name = "ISO")]
    pub(crate) cdrom: Option<String>,
    /// Write guest changes back to the image instead of discarding them.
    #[arg(long)]
    pub(crate) no_snapshot: bool,
    /// Boot `x86_64` guests with OVMF firmware.
    #[arg(long)]
    pub(crate) firmware: bool,
    /// Open a display window instead of running headless.
    #[arg(long, env = "VMTEST_GUI")]
    pub(crate) gui: bool,
    /// What to wait for after boot: `ssh` or `qmp:<EVENT>`.
    #[arg(long, value_name = "MODE", default_value = "ssh")]
    pub(crate) wait: String,
    /// Emulator binary; defaults to `qemu-system-<arch>`.
    #[arg(long, value_name = "PATH")]
    pub(crate) qemu_bin: Option<String>,
    /// Extra argument appended to the QEMU command line (repeatable).
    #[arg(long = "qemu-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub(crate) qemu_args: Vec<String>,
    /// Login and commands for the session.
    #[command(flatten)]
    pub(crate) session: SessionArgs,
}

/// Arguments for the `vmtest cloud` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CloudCommand {
    /// Override the image identifier or label for this run.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Override the Scaleway instance type (commercial type) for this run.
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Login and commands for the session.
    #[command(flatten)]
    pub(crate) session: SessionArgs,
}

/// Login, file copies, and the command shared by both subcommands.
#[derive(Debug, Args)]
pub(crate) struct SessionArgs {
    /// Remote user to log in as.
    #[arg(long, value_name = "USER", default_value = "root")]
    pub(crate) user: String,
    /// Password for the remote user; requires `sshpass`.
    #[arg(long, value_name = "PASSWORD", env = "VMTEST_PASSWORD", conflicts_with = "keyfile")]
    pub(crate) password: Option<String>,
    /// Private key offered to the remote host.
    #[arg(long, value_name = "PATH", conflicts_with = "password")]
    pub(crate) keyfile: Option<String>,
    /// Copy a local file to the guest before the command runs (repeatable).
    #[arg(long, value_name = "SRC:DST")]
    pub(crate) copy: Vec<String>,
    /// Command to execute on the guest (use -- to separate flags).
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub(crate) command: Vec<String>,
}
