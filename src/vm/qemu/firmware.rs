//! UEFI firmware discovery.
//!
//! Every distribution installs OVMF somewhere else, so the first existing
//! file from a fixed candidate list wins.

use camino::{Utf8Path, Utf8PathBuf};

use crate::vm::VmError;

/// Known OVMF install locations, tried in order.
pub const OVMF_CANDIDATES: &[&str] = &[
    // Debian/Ubuntu
    "/usr/share/ovmf/OVMF.fd",
    // Fedora/RHEL
    "/usr/share/OVMF/OVMF_CODE.fd",
    "/usr/share/edk2/ovmf/OVMF_CODE.fd",
    "/usr/share/qemu/OVMF.fd",
    // Arch
    "/usr/share/edk2-ovmf/x64/OVMF_CODE.fd",
];

/// Returns the first installed OVMF firmware image.
///
/// # Errors
///
/// Returns [`VmError::FirmwareNotFound`] when no candidate exists.
pub fn find_firmware() -> Result<Utf8PathBuf, VmError> {
    find_firmware_in(OVMF_CANDIDATES.iter().map(Utf8Path::new))
}

/// Returns the first existing path from `candidates`.
///
/// # Errors
///
/// Returns [`VmError::FirmwareNotFound`] listing every path tried when none
/// exists.
pub fn find_firmware_in<'a, I>(candidates: I) -> Result<Utf8PathBuf, VmError>
where
    I: IntoIterator<Item = &'a Utf8Path>,
{
    let mut tried = Vec::new();
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        tried.push(candidate.to_string());
    }
    Err(VmError::FirmwareNotFound { candidates: tried })
}
