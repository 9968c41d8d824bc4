//! Security group calls backing the per-run SSH ingress policy.
//!
//! Groups are stateful, drop inbound traffic by default and accept all
//! outbound traffic, so the single inbound rule is the only way in. The rule
//! admits the configured source range on the SSH port.

use serde::{Deserialize, Serialize};

use crate::backend::{AccessPolicyHandle, AccessPolicyRequest};

use super::super::{ScalewayBackend, ScalewayBackendError};

#[derive(Debug, Serialize)]
pub(super) struct CreateSecurityGroupRequest<'a> {
    pub(super) name: &'a str,
    pub(super) description: &'a str,
    pub(super) project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) organization: Option<&'a str>,
    pub(super) stateful: bool,
    pub(super) inbound_default_policy: &'static str,
    pub(super) outbound_default_policy: &'static str,
}

impl<'a> CreateSecurityGroupRequest<'a> {
    pub(super) fn new(request: &'a AccessPolicyRequest) -> Self {
        Self {
            name: &request.name,
            description: &request.description,
            project: &request.project_id,
            organization: request.organisation_id.as_deref(),
            stateful: true,
            inbound_default_policy: "drop",
            outbound_default_policy: "accept",
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CreateRuleRequest<'a> {
    pub(super) protocol: &'static str,
    pub(super) direction: &'static str,
    pub(super) action: &'static str,
    pub(super) ip_range: &'a str,
    pub(super) dest_port_from: u16,
}

impl<'a> CreateRuleRequest<'a> {
    pub(super) const fn inbound_tcp(port: u16, ip_range: &'a str) -> Self {
        Self {
            protocol: "TCP",
            direction: "inbound",
            action: "accept",
            ip_range,
            dest_port_from: port,
        }
    }
}

#[derive(Deserialize)]
struct SecurityGroupEnvelope {
    security_group: SecurityGroupBody,
}

#[derive(Deserialize)]
struct SecurityGroupBody {
    id: String,
}

fn group_path(policy: &AccessPolicyHandle) -> String {
    format!("security_groups/{}", policy.id)
}

impl ScalewayBackend {
    pub(in crate::scaleway) async fn create_security_group(
        &self,
        request: &AccessPolicyRequest,
    ) -> Result<AccessPolicyHandle, ScalewayBackendError> {
        let body = self
            .send_checked(
                super::HTTP_CLIENT
                    .post(super::zone_url(&request.zone, "security_groups"))
                    .json(&CreateSecurityGroupRequest::new(request)),
            )
            .await?;
        let parsed: SecurityGroupEnvelope =
            serde_json::from_slice(&body).map_err(ScalewayBackendError::transport)?;
        Ok(AccessPolicyHandle {
            id: parsed.security_group.id,
            zone: request.zone.clone(),
        })
    }

    pub(in crate::scaleway) async fn add_inbound_rule(
        &self,
        policy: &AccessPolicyHandle,
        port: u16,
    ) -> Result<(), ScalewayBackendError> {
        let path = format!("{}/rules", group_path(policy));
        let rule = CreateRuleRequest::inbound_tcp(port, self.config.ingress_cidr.trim());
        self.send_checked(
            super::HTTP_CLIENT
                .post(super::zone_url(&policy.zone, &path))
                .json(&rule),
        )
        .await?;
        Ok(())
    }

    pub(in crate::scaleway) async fn delete_security_group(
        &self,
        policy: &AccessPolicyHandle,
    ) -> Result<(), ScalewayBackendError> {
        self.send_checked(
            super::HTTP_CLIENT.delete(super::zone_url(&policy.zone, &group_path(policy))),
        )
        .await?;
        Ok(())
    }
}
