//! QEMU command line construction.
//!
//! Each supported architecture has a fixed machine type, CPU model, disk
//! wiring and network device. Everything else is shared: user-mode
//! networking with the guest's port 22 forwarded to a host port, the serial
//! console on stdio, and a QMP socket for out-of-band events.

use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;

use crate::vm::VmError;

/// Firmware used on `aarch64`, where booting without UEFI is not an option.
pub const AAVMF_FIRMWARE: &str = "/usr/share/AAVMF/AAVMF_CODE.fd";

/// Guest architectures with a known device topology.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Arch {
    /// 64-bit x86 (`amd64`).
    X86_64,
    /// 64-bit Arm (`arm64`).
    Aarch64,
    /// 64-bit POWER (`ppc64le`).
    Ppc64,
    /// IBM Z.
    S390x,
}

impl Arch {
    /// Architecture of the machine running this process.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::UnsupportedArchitecture`] on hosts without a
    /// matching guest topology.
    pub fn host() -> Result<Self, VmError> {
        std::env::consts::ARCH.parse()
    }

    /// Canonical architecture name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Ppc64 => "ppc64",
            Self::S390x => "s390x",
        }
    }

    const fn net_device(self) -> &'static str {
        match self {
            Self::S390x => "virtio-net-ccw",
            Self::X86_64 | Self::Aarch64 | Self::Ppc64 => "virtio-net-pci",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = VmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            "ppc64" | "ppc64le" | "powerpc64" => Ok(Self::Ppc64),
            "s390x" => Ok(Self::S390x),
            other => Err(VmError::UnsupportedArchitecture {
                arch: other.to_owned(),
            }),
        }
    }
}

/// Disk image format, inferred from the file extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageFormat {
    /// `.qcow2`
    Qcow2,
    /// `.img`
    Raw,
}

impl ImageFormat {
    /// Infers the format strictly from the extension.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::UnsupportedImageFormat`] for any other extension.
    pub fn from_path(path: &Utf8Path) -> Result<Self, VmError> {
        match path.extension() {
            Some("qcow2") => Ok(Self::Qcow2),
            Some("img") => Ok(Self::Raw),
            _ => Err(VmError::UnsupportedImageFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Value for QEMU's `format=` drive option.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qcow2 => "qcow2",
            Self::Raw => "raw",
        }
    }
}

/// Inputs for one QEMU invocation.
#[derive(Clone, Debug)]
pub struct QemuCommandLine<'a> {
    /// Guest architecture.
    pub arch: Arch,
    /// Disk image backing `disk0`.
    pub image: &'a Utf8Path,
    /// Memory size as understood by `-m`.
    pub memory: &'a str,
    /// Host port forwarded to the guest's port 22.
    pub ssh_port: u16,
    /// QMP socket path.
    pub qmp_socket: &'a Utf8Path,
    /// Optional boot ISO.
    pub cdrom: Option<&'a Utf8Path>,
    /// UEFI firmware for `x86_64`.
    pub firmware: Option<&'a Utf8Path>,
    /// Discard guest writes to the disk image.
    pub snapshot: bool,
    /// Open a display window instead of running headless.
    pub gui: bool,
    /// Arguments appended verbatim.
    pub extra_args: &'a [String],
}

impl QemuCommandLine<'_> {
    /// Default emulator binary for the architecture.
    #[must_use]
    pub fn program(&self) -> String {
        format!("qemu-system-{}", self.arch)
    }

    /// Builds the argument list, excluding the program name.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::UnsupportedImageFormat`] when the image extension
    /// is not recognised.
    pub fn args(&self) -> Result<Vec<String>, VmError> {
        let format = ImageFormat::from_path(self.image)?;
        let mut args = self.arch_args();

        args.extend([
            String::from("-m"),
            self.memory.to_owned(),
            String::from("-serial"),
            String::from("stdio"),
            String::from("-monitor"),
            String::from("none"),
            String::from("-device"),
            format!("{},netdev=net.0,id=net.0", self.arch.net_device()),
            String::from("-netdev"),
            format!("user,id=net.0,hostfwd=tcp::{}-:22", self.ssh_port),
            String::from("-qmp"),
            format!("unix:{},server,nowait", self.qmp_socket),
            String::from("-drive"),
            format!(
                "file={},if=none,id=disk0,format={}",
                self.image,
                format.as_str()
            ),
        ]);
        if !self.gui {
            args.push(String::from("-nographic"));
        }
        if let Some(cdrom) = self.cdrom {
            args.extend([String::from("-cdrom"), cdrom.to_string()]);
        }
        if self.snapshot {
            args.push(String::from("-snapshot"));
        }
        args.extend(self.extra_args.iter().cloned());
        Ok(args)
    }

    fn arch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = match self.arch {
            Arch::X86_64 => ["-M", "q35,accel=kvm", "-cpu", "Haswell-v4"]
                .map(String::from)
                .to_vec(),
            Arch::Aarch64 => [
                "-machine",
                "virt",
                "-cpu",
                "cortex-a57",
                "-smp",
                "2",
                "-bios",
                AAVMF_FIRMWARE,
            ]
            .map(String::from)
            .to_vec(),
            Arch::Ppc64 => ["-machine", "pseries", "-smp", "2"]
                .map(String::from)
                .to_vec(),
            Arch::S390x => [
                "-machine",
                "s390-ccw-virtio",
                "-smp",
                "2",
                "-device",
                "virtio-blk,drive=disk0,bootindex=1",
            ]
            .map(String::from)
            .to_vec(),
        };
        if self.arch != Arch::S390x {
            args.extend(
                [
                    "-device",
                    "virtio-scsi-pci,id=scsi",
                    "-device",
                    "scsi-hd,drive=disk0",
                ]
                .map(String::from),
            );
        }
        if self.arch == Arch::X86_64
            && let Some(firmware) = self.firmware
        {
            args.extend([String::from("-bios"), firmware.to_string()]);
        }
        args
    }
}
