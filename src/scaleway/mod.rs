//! Scaleway backend implementation of the instance lifecycle.
//!
//! Instance listing, image listing and power actions go through
//! `scaleway-rs`. Security groups and server creation use the Instances API
//! directly because the SDK cannot attach a group to a new server.

mod error;
mod lifecycle;
mod types;

use scaleway_rs::ScalewayApi;
use tracing::{debug, info};

use crate::backend::{
    AccessPolicyHandle, AccessPolicyRequest, Backend, BackendFuture, InstanceHandle,
    InstanceNetworking, InstanceRequest,
};
use crate::config::ScalewayConfig;
use lifecycle::InstanceSnapshot;
use types::ServerAction;

pub use error::ScalewayBackendError;

/// Backend that provisions instances through the Scaleway Instances API.
///
/// Ports, the ingress range and polling budgets all come from the
/// [`ScalewayConfig`] the backend was built with.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    config: ScalewayConfig,
}

impl std::fmt::Debug for ScalewayBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayBackend")
            .field("zone", &self.config.default_zone)
            .field("project", &self.config.default_project_id)
            .field("ssh_port", &self.config.ssh_port)
            .field("ingress_cidr", &self.config.ingress_cidr)
            .finish_non_exhaustive()
    }
}

impl ScalewayBackend {
    /// Validates `config` and opens an API client with its secret key.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] naming the first unusable
    /// setting.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
        })
    }

    /// The request `vmtest cloud` boots when no flag overrides it.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the stored settings no
    /// longer validate.
    pub fn default_request(&self) -> Result<InstanceRequest, ScalewayBackendError> {
        self.config.as_request().map_err(ScalewayBackendError::from)
    }
}

impl Backend for ScalewayBackend {
    type Error = ScalewayBackendError;

    fn ssh_port(&self) -> u16 {
        self.config.ssh_port
    }

    fn create_access_policy<'a>(
        &'a self,
        request: &'a AccessPolicyRequest,
    ) -> BackendFuture<'a, AccessPolicyHandle, Self::Error> {
        Box::pin(async move {
            let handle = self.create_security_group(request).await?;
            debug!(security_group = %handle.id, name = %request.name, "security group created");
            Ok(handle)
        })
    }

    fn authorize_ingress<'a>(
        &'a self,
        policy: &'a AccessPolicyHandle,
        port: u16,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.add_inbound_rule(policy, port).await })
    }

    fn delete_access_policy(&self, policy: AccessPolicyHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move { self.delete_security_group(&policy).await })
    }

    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
        policy: &'a AccessPolicyHandle,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let image_id = self.image_for(request).await?;
            let server = self.create_server(request, &image_id, policy).await?;
            let snapshot = InstanceSnapshot::from(server);
            info!(instance = %snapshot.id, image = %image_id, state = %snapshot.state, "server created");
            Ok(InstanceHandle {
                id: snapshot.id,
                zone: request.zone.clone(),
            })
        })
    }

    fn power_on<'a>(&'a self, handle: &'a InstanceHandle) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let snapshot = self.fetch_instance(handle).await?.ok_or_else(|| {
                ScalewayBackendError::InstanceGone {
                    instance_id: handle.id.clone(),
                }
            })?;
            self.power_on_if_needed(&handle.zone, &snapshot).await
        })
    }

    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> BackendFuture<'a, InstanceNetworking, Self::Error> {
        Box::pin(async move { self.wait_for_public_ip(handle).await })
    }

    fn destroy(&self, handle: InstanceHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let Some(snapshot) = self.fetch_instance(&handle).await? else {
                return Ok(());
            };
            // Stopped servers cannot be terminated, only deleted.
            if snapshot.allows(&ServerAction::Terminate) {
                self.api
                    .perform_instance_action_async(
                        &handle.zone,
                        &handle.id,
                        ServerAction::Terminate.as_str(),
                    )
                    .await?;
            } else {
                self.api
                    .delete_instance_async(&handle.zone, &handle.id)
                    .await?;
            }
            self.wait_until_gone(&handle).await
        })
    }
}
