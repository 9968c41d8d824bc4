//! VM backed by a cloud instance.
//!
//! Each `CloudVm` owns at most one ingress policy and one instance. Both are
//! recorded as owned the moment the provider returns them, before they are
//! configured or booted, so any later failure still leaves them to
//! [`Vm::force_stop`]. A retried start resumes from the first step that did
//! not complete. Teardown terminates the instance before deleting the policy
//! it is attached to.

use std::fmt::Display;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{AccessPolicyHandle, Backend, InstanceHandle, InstanceRequest};
use crate::remote::{CommandRunner, RemoteExecutor, SshEndpoint, StreamingCommandRunner};
use crate::vm::{Vm, VmError, VmFuture};

/// A disposable cloud instance reachable over SSH.
#[derive(Debug)]
pub struct CloudVm<B: Backend, R: CommandRunner = StreamingCommandRunner> {
    backend: B,
    request: InstanceRequest,
    executor: RemoteExecutor<R>,
    policy: Option<AccessPolicyHandle>,
    ingress_open: bool,
    instance: Option<InstanceHandle>,
    booted: bool,
    endpoint: Option<SshEndpoint>,
}

impl<B: Backend, R: CommandRunner> CloudVm<B, R> {
    /// Creates a stopped VM. Nothing is provisioned until it starts.
    #[must_use]
    pub const fn new(backend: B, request: InstanceRequest, executor: RemoteExecutor<R>) -> Self {
        Self {
            backend,
            request,
            executor,
            policy: None,
            ingress_open: false,
            instance: None,
            booted: false,
            endpoint: None,
        }
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Instance currently owned, if any.
    #[must_use]
    pub const fn instance(&self) -> Option<&InstanceHandle> {
        self.instance.as_ref()
    }

    /// Ingress policy currently owned, if any.
    #[must_use]
    pub const fn access_policy(&self) -> Option<&AccessPolicyHandle> {
        self.policy.as_ref()
    }

    async fn provision(&mut self) -> Result<(), VmError> {
        let policy = self.open_ingress().await?;
        let instance = self.boot_instance(&policy).await?;

        let networking = self
            .backend
            .wait_for_ready(&instance)
            .await
            .map_err(|err| provider_failure("wait for instance", err))?;
        info!(address = %networking.public_ip, "instance running");
        self.endpoint = Some(SshEndpoint::from(&networking));

        if let Err(err) = self.wait_ssh_ready().await {
            self.endpoint = None;
            return Err(err);
        }
        Ok(())
    }

    async fn open_ingress(&mut self) -> Result<AccessPolicyHandle, VmError> {
        let policy = match self.policy.clone() {
            Some(policy) => policy,
            None => {
                let request = self
                    .request
                    .access_policy_request(format!("vmtest-{}", Uuid::new_v4()));
                let created = self
                    .backend
                    .create_access_policy(&request)
                    .await
                    .map_err(|err| provider_failure("create access policy", err))?;
                info!(policy = %created.id, "created access policy");
                self.policy = Some(created.clone());
                created
            }
        };
        if !self.ingress_open {
            self.backend
                .authorize_ingress(&policy, self.backend.ssh_port())
                .await
                .map_err(|err| provider_failure("authorise ssh ingress", err))?;
            self.ingress_open = true;
        }
        Ok(policy)
    }

    async fn boot_instance(&mut self, policy: &AccessPolicyHandle) -> Result<InstanceHandle, VmError> {
        let instance = match self.instance.clone() {
            Some(instance) => instance,
            None => {
                let created = self
                    .backend
                    .create(&self.request, policy)
                    .await
                    .map_err(|err| provider_failure("create instance", err))?;
                info!(instance = %created.id, zone = %created.zone, "created instance");
                self.instance = Some(created.clone());
                created
            }
        };
        if !self.booted {
            self.backend
                .power_on(&instance)
                .await
                .map_err(|err| provider_failure("power on instance", err))?;
            self.booted = true;
        }
        Ok(instance)
    }

    async fn teardown(&mut self) {
        if let Some(instance) = self.instance.clone() {
            match self.backend.destroy(instance.clone()).await {
                Ok(()) => {
                    info!(instance = %instance.id, "terminated instance");
                    self.instance = None;
                    self.booted = false;
                }
                Err(err) => log_teardown_failure("terminate instance", &err),
            }
        }
        if let Some(policy) = self.policy.clone() {
            match self.backend.delete_access_policy(policy.clone()).await {
                Ok(()) => {
                    info!(policy = %policy.id, "deleted access policy");
                    self.policy = None;
                    self.ingress_open = false;
                }
                Err(err) => log_teardown_failure("delete access policy", &err),
            }
        }
        self.endpoint = None;
    }
}

fn provider_failure<E>(action: &str, err: E) -> VmError
where
    E: std::error::Error + Send + Sync + 'static,
{
    error!(error = %err, "failed to {action}");
    VmError::provider(err)
}

fn log_teardown_failure(action: &str, err: &impl Display) {
    warn!(error = %err, "failed to {action}; continuing teardown");
}

impl<B: Backend, R: CommandRunner> Vm for CloudVm<B, R> {
    type Runner = R;

    fn start(&mut self) -> VmFuture<'_, ()> {
        Box::pin(async move {
            if self.running() {
                return Ok(());
            }
            self.provision().await
        })
    }

    fn force_stop(&mut self) -> VmFuture<'_, ()> {
        Box::pin(async move {
            self.teardown().await;
            Ok(())
        })
    }

    fn running(&mut self) -> bool {
        self.instance.is_some() && self.endpoint.is_some()
    }

    fn endpoint(&self) -> Option<SshEndpoint> {
        self.endpoint.clone()
    }

    fn executor(&self) -> &RemoteExecutor<R> {
        &self.executor
    }
}

impl<B: Backend, R: CommandRunner> Drop for CloudVm<B, R> {
    fn drop(&mut self) {
        if let Some(instance) = &self.instance {
            warn!(instance = %instance.id, "instance still owned at drop; call force_stop");
        }
        if let Some(policy) = &self.policy {
            warn!(policy = %policy.id, "access policy still owned at drop; call force_stop");
        }
    }
}
