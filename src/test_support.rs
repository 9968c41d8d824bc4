//! Scripted stand-ins for the SSH toolchain and the cloud provider, plus an
//! environment guard, shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::backend::{
    AccessPolicyHandle, AccessPolicyRequest, Backend, BackendFuture, InstanceHandle,
    InstanceNetworking, InstanceRequest,
};
use crate::remote::{CommandOutput, CommandRunner, RemoteError};

/// One `ssh`/`scp`/`ssh-keygen` call seen by [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program as given.
    pub program: String,
    /// Arguments in order.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Arguments, lossily converted for assertions.
    #[must_use]
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Program and arguments joined by single spaces.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.arg_strings())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// [`CommandRunner`] that answers from a queue instead of spawning.
///
/// Each call pops the oldest queued output; an empty queue is reported as a
/// spawn failure so a missing answer fails the test loudly.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    queue: Rc<RefCell<VecDeque<CommandOutput>>>,
    seen: Rc<RefCell<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Runner with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, oldest first.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.seen.borrow().clone()
    }

    /// Queues a silent exit 0.
    pub fn push_success(&self) {
        self.push_output(Some(0), "");
    }

    /// Queues what `ssh` prints when the guest is not listening yet.
    pub fn push_connection_refused(&self) {
        self.push_output(
            Some(crate::remote::SSH_CONNECTION_FAILURE),
            "ssh: connect to host localhost port 22: Connection refused\n",
        );
    }

    /// Queues an exit code with combined output; `None` stands for death by
    /// signal.
    pub fn push_output(&self, code: Option<i32>, output: impl Into<String>) {
        self.queue.borrow_mut().push_back(CommandOutput {
            code,
            output: output.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        self.seen.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let next = self.queue.borrow_mut().pop_front();
        next.ok_or_else(|| RemoteError::Spawn {
            program: program.to_owned(),
            message: String::from("runner queue is empty"),
        })
    }
}

/// Failure injected by [`ScriptedBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted provider failure in {operation}")]
pub struct ScriptedBackendFailure {
    /// Backend call that was told to fail.
    pub operation: String,
}

#[derive(Debug)]
struct BackendScript {
    calls: Vec<String>,
    failing: BTreeSet<String>,
    networking: InstanceNetworking,
    next_id: u32,
}

/// In-memory [`Backend`] that records calls and fails on request.
///
/// Call records have the form `"<operation> <argument>"`, for example
/// `"destroy i-1"` or `"authorize_ingress sg-1 22"`.
#[derive(Clone, Debug)]
pub struct ScriptedBackend {
    script: Arc<StdMutex<BackendScript>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Creates a backend that succeeds everywhere and reports
    /// `127.0.0.1:22` once instances are ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Arc::new(StdMutex::new(BackendScript {
                calls: Vec::new(),
                failing: BTreeSet::new(),
                networking: InstanceNetworking {
                    public_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                    ssh_port: 22,
                },
                next_id: 1,
            })),
        }
    }

    /// Makes every later call to `operation` fail.
    #[must_use]
    pub fn failing_on(self, operation: &str) -> Self {
        self.lock().failing.insert(operation.to_owned());
        self
    }

    /// Lets every operation succeed again.
    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Overrides the networking reported by `wait_for_ready`.
    #[must_use]
    pub fn with_networking(self, networking: InstanceNetworking) -> Self {
        self.lock().networking = networking;
        self
    }

    /// Returns the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: &str, argument: &str) -> Result<(), ScriptedBackendFailure> {
        let mut script = self.lock();
        script.calls.push(format!("{operation} {argument}"));
        if script.failing.contains(operation) {
            return Err(ScriptedBackendFailure {
                operation: operation.to_owned(),
            });
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut script = self.lock();
        let id = script.next_id;
        script.next_id += 1;
        format!("{prefix}-{id}")
    }
}

impl Backend for ScriptedBackend {
    type Error = ScriptedBackendFailure;

    fn create_access_policy<'a>(
        &'a self,
        request: &'a AccessPolicyRequest,
    ) -> BackendFuture<'a, AccessPolicyHandle, Self::Error> {
        Box::pin(async move {
            self.record("create_access_policy", &request.name)?;
            Ok(AccessPolicyHandle {
                id: self.next_id("sg"),
                zone: request.zone.clone(),
            })
        })
    }

    fn authorize_ingress<'a>(
        &'a self,
        policy: &'a AccessPolicyHandle,
        port: u16,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.record("authorize_ingress", &format!("{} {port}", policy.id)) })
    }

    fn delete_access_policy(&self, policy: AccessPolicyHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move { self.record("delete_access_policy", &policy.id) })
    }

    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
        policy: &'a AccessPolicyHandle,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            self.record("create", &format!("{} {}", request.image, policy.id))?;
            Ok(InstanceHandle {
                id: self.next_id("i"),
                zone: request.zone.clone(),
            })
        })
    }

    fn power_on<'a>(&'a self, handle: &'a InstanceHandle) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.record("power_on", &handle.id) })
    }

    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> BackendFuture<'a, InstanceNetworking, Self::Error> {
        Box::pin(async move {
            self.record("wait_for_ready", &handle.id)?;
            Ok(self.lock().networking.clone())
        })
    }

    fn destroy(&self, handle: InstanceHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move { self.record("destroy", &handle.id) })
    }
}

/// Writes an executable shell script named `name` into `dir`.
///
/// # Errors
///
/// Returns any I/O error raised while writing or marking the file
/// executable.
pub fn write_script(
    dir: &std::path::Path,
    name: &str,
    body: &str,
) -> std::io::Result<camino::Utf8PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    camino::Utf8PathBuf::from_path_buf(path).map_err(|path| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("non UTF-8 script path: {}", path.display()),
        )
    })
}

static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Sets environment variables for one test and restores them on drop.
///
/// Every guard holds one process-wide lock, so tests touching the
/// environment run one at a time.
pub struct EnvGuard {
    restore: Vec<(String, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Waits for the lock, then sets each `(name, value)` pair.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let lock = ENV_LOCK.lock().await;
        let mut restore: Vec<(String, Option<OsString>)> = Vec::with_capacity(pairs.len());
        for &(name, value) in pairs {
            debug_assert!(
                restore.iter().all(|(seen, _)| seen != name),
                "{name} set twice in one EnvGuard"
            );
            restore.push((name.to_owned(), env::var_os(name)));
            // SAFETY: `ENV_LOCK` is held, so no other guard mutates the environment.
            unsafe { env::set_var(name, value) };
        }
        Self {
            restore,
            _lock: lock,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, old) in self.restore.drain(..).rev() {
            // SAFETY: `_lock` is still held until this guard is gone.
            unsafe {
                match old {
                    Some(value) => env::set_var(&name, value),
                    None => env::remove_var(&name),
                }
            }
        }
    }
}
