//! Instance lifecycle helpers for the Scaleway backend.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use scaleway_rs::{ScalewayApiError, ScalewayInstance};

mod create;
mod image;
mod security_group;
mod wait;

use crate::scaleway::types::{ServerAction, ServerState};

use super::{ScalewayBackend, ScalewayBackendError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
const AUTH_HEADER: &str = "X-Auth-Token";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// What the lifecycle needs to know about one server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct InstanceSnapshot {
    pub(crate) id: String,
    pub(crate) state: ServerState,
    pub(crate) allowed_actions: Vec<ServerAction>,
    pub(crate) public_ip: Option<String>,
}

impl InstanceSnapshot {
    pub(crate) fn allows(&self, action: &ServerAction) -> bool {
        self.allowed_actions.contains(action)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }
}

impl From<ScalewayInstance> for InstanceSnapshot {
    fn from(server: ScalewayInstance) -> Self {
        Self {
            id: server.id,
            state: ServerState::from(server.state),
            allowed_actions: server
                .allowed_actions
                .into_iter()
                .map(ServerAction::from)
                .collect(),
            public_ip: server.public_ip.map(|ip| ip.address),
        }
    }
}

fn zone_url(zone: &str, path: &str) -> String {
    format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{zone}/{path}")
}

/// Maps a non-success response body onto a provider error, keeping the
/// Scaleway error type as the code when the body carries one.
fn api_error(status: StatusCode, body: &[u8]) -> ScalewayBackendError {
    serde_json::from_slice::<ScalewayApiError>(body).map_or_else(
        |_| ScalewayBackendError::Provider {
            code: status.as_u16().to_string(),
            message: String::from_utf8_lossy(body).into_owned(),
        },
        ScalewayBackendError::from,
    )
}

impl ScalewayBackend {
    /// Sends an authenticated request and returns the status and raw body.
    async fn send_raw(
        &self,
        request: RequestBuilder,
    ) -> Result<(StatusCode, Vec<u8>), ScalewayBackendError> {
        let response = request
            .header(AUTH_HEADER, &self.config.secret_key)
            .send()
            .await
            .map_err(ScalewayBackendError::transport)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ScalewayBackendError::transport)?;
        Ok((status, body.to_vec()))
    }

    async fn send_checked(&self, request: RequestBuilder) -> Result<Vec<u8>, ScalewayBackendError> {
        let (status, body) = self.send_raw(request).await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(api_error(status, &body))
        }
    }
}

#[cfg(test)]
mod tests;
