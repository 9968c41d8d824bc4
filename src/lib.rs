//! Disposable virtual machines for integration tests.
//!
//! A VM is booted either locally under QEMU or as a Scaleway instance, driven
//! over the system SSH client, and always torn down afterwards. The [`vm::Vm`]
//! trait carries the shared behaviour (readiness probing, command execution,
//! file copies) and [`vm::with_vm`] scopes a VM's lifetime to a closure.

pub mod backend;
pub mod config;
pub mod logging;
pub mod poller;
pub mod remote;
pub mod scaleway;
pub mod test_support;
pub mod vm;

pub use backend::{
    Backend, InstanceHandle, InstanceNetworking, InstanceRequest, InstanceRequestBuilder,
};
pub use config::ScalewayConfig;
pub use scaleway::{ScalewayBackend, ScalewayBackendError};
pub use vm::{CloudVm, QemuVm, Vm, VmError, with_vm};
