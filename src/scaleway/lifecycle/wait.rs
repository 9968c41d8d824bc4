//! Polling a server through boot and termination.
//!
//! Both waits share the configured poll interval and timeout. A server that
//! is not listed yet while booting is treated like one still starting.

use std::net::IpAddr;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::backend::{InstanceHandle, InstanceNetworking};
use crate::scaleway::types::ServerState;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

impl ScalewayBackend {
    /// Looks the server up by identifier; `None` once it no longer exists.
    pub(in crate::scaleway) async fn fetch_instance(
        &self,
        handle: &InstanceHandle,
    ) -> Result<Option<InstanceSnapshot>, ScalewayBackendError> {
        let servers = self
            .api
            .list_instances(&handle.zone)
            .servers(&handle.id)
            .per_page(1)
            .run_async()
            .await?;
        Ok(servers.into_iter().next().map(InstanceSnapshot::from))
    }

    pub(in crate::scaleway) async fn wait_for_public_ip(
        &self,
        handle: &InstanceHandle,
    ) -> Result<InstanceNetworking, ScalewayBackendError> {
        let deadline = Instant::now() + self.config.ready_timeout();
        let mut last_state: Option<ServerState> = None;

        loop {
            if let Some(server) = self.fetch_instance(handle).await? {
                if server.is_running()
                    && let Some(public_ip) = server
                        .public_ip
                        .as_deref()
                        .and_then(|ip| ip.parse::<IpAddr>().ok())
                {
                    return Ok(InstanceNetworking {
                        public_ip,
                        ssh_port: self.config.ssh_port,
                    });
                }
                if last_state.as_ref() != Some(&server.state) {
                    debug!(instance = %handle.id, state = %server.state, "waiting for instance");
                }
                last_state = Some(server.state);
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(self.config.poll_interval()).await;
        }

        let instance_id = handle.id.clone();
        Err(match last_state {
            Some(ServerState::Running) => ScalewayBackendError::MissingPublicIp { instance_id },
            _ => ScalewayBackendError::Timeout {
                action: String::from("boot"),
                instance_id,
            },
        })
    }

    pub(in crate::scaleway) async fn wait_until_gone(
        &self,
        handle: &InstanceHandle,
    ) -> Result<(), ScalewayBackendError> {
        let deadline = Instant::now() + self.config.ready_timeout();
        while self.fetch_instance(handle).await?.is_some() {
            if Instant::now() >= deadline {
                return Err(ScalewayBackendError::ResidualResource {
                    instance_id: handle.id.clone(),
                });
            }
            sleep(self.config.poll_interval()).await;
        }
        Ok(())
    }
}
