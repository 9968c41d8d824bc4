//! Instance creation helpers for the Scaleway backend.
//!
//! `scaleway-rs` has no way to attach a security group at creation time, so
//! the server is created with a direct call to the Instances API. Servers are
//! created stopped; booting is a separate step so the caller owns the server
//! before the boot can fail.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{AccessPolicyHandle, InstanceRequest};
use crate::scaleway::types::ServerAction;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

#[derive(Debug, Serialize)]
pub(super) struct CreateServerRequest {
    pub(super) name: String,
    pub(super) commercial_type: String,
    pub(super) image: String,
    pub(super) project: String,
    pub(super) routed_ip_enabled: bool,
    pub(super) dynamic_ip_required: bool,
    pub(super) security_group: String,
    pub(super) tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) organization: Option<String>,
}

impl CreateServerRequest {
    pub(super) fn new(request: &InstanceRequest, image_id: &str, policy: &AccessPolicyHandle) -> Self {
        Self {
            name: format!("vmtest-{}", Uuid::new_v4()),
            commercial_type: request.instance_type.clone(),
            image: image_id.to_owned(),
            project: request.project_id.clone(),
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            security_group: policy.id.clone(),
            tags: vec![String::from("vmtest"), String::from("ephemeral")],
            organization: request.organisation_id.clone(),
        }
    }
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: scaleway_rs::ScalewayInstance,
}

impl ScalewayBackend {
    pub(in crate::scaleway) fn is_instance_type_error(
        api_err: &scaleway_rs::ScalewayApiError,
        request: &InstanceRequest,
    ) -> bool {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == request.instance_type)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        zone: &str,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        if snapshot.is_running() {
            return Ok(());
        }
        if !snapshot.allows(&ServerAction::PowerOn) {
            return Err(ScalewayBackendError::PowerOnNotAllowed {
                instance_id: snapshot.id.clone(),
                state: snapshot.state.to_string(),
            });
        }
        self.api
            .perform_instance_action_async(zone, &snapshot.id, ServerAction::PowerOn.as_str())
            .await?;
        Ok(())
    }

    /// Creates a stopped Scaleway server attached to `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::InstanceTypeUnavailable`] when the
    /// provider rejects the commercial type and
    /// [`ScalewayBackendError::Provider`] for any other failure.
    pub(in crate::scaleway) async fn create_server(
        &self,
        request: &InstanceRequest,
        image_id: &str,
        policy: &AccessPolicyHandle,
    ) -> Result<scaleway_rs::ScalewayInstance, ScalewayBackendError> {
        let payload = CreateServerRequest::new(request, image_id, policy);
        let (status, body) = self
            .send_raw(
                super::HTTP_CLIENT
                    .post(super::zone_url(&request.zone, "servers"))
                    .json(&payload),
            )
            .await?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(ScalewayBackendError::transport)?;
            return Ok(parsed.server);
        }

        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && Self::is_instance_type_error(&api_err, request)
        {
            return Err(ScalewayBackendError::InstanceTypeUnavailable {
                instance_type: request.instance_type.clone(),
                zone: request.zone.clone(),
            });
        }

        Err(super::api_error(status, &body))
    }
}
