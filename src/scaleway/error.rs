//! Failures of the Scaleway backend, grouped by the lifecycle step that
//! raises them: settings, instance creation, boot, teardown, and the API
//! itself.

use scaleway_rs::{ScalewayApiError, ScalewayError};
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;

/// Everything a [`ScalewayBackend`](super::ScalewayBackend) call can fail
/// with.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// `ScalewayConfig` failed validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// The named [`InstanceRequest`](crate::InstanceRequest) field is blank.
    #[error("invalid instance request: {0}")]
    Validation(String),

    /// No usable image matched the label in the project or public catalogue.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Label as configured.
        label: String,
        /// Architecture the image had to match.
        arch: String,
        /// Zone searched.
        zone: String,
    },
    /// The commercial type is not offered in the zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Commercial type, e.g. `DEV1-S`.
        instance_type: String,
        /// Zone searched.
        zone: String,
    },

    /// The server vanished between creation and power-on.
    #[error("instance {instance_id} disappeared before it was powered on")]
    InstanceGone {
        /// Server id.
        instance_id: String,
    },
    /// The server neither runs nor lists `poweron` among its actions.
    #[error("instance {instance_id} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Server id.
        instance_id: String,
        /// State the API reported.
        state: String,
    },
    /// The server stopped changing before `ready_timeout_secs` ran out.
    #[error("timeout waiting for {action} on instance {instance_id}")]
    Timeout {
        /// Step being waited on, e.g. `boot`.
        action: String,
        /// Server id.
        instance_id: String,
    },
    /// The server runs but never received a public IPv4 address.
    #[error("instance {instance_id} missing public IPv4 address")]
    MissingPublicIp {
        /// Server id.
        instance_id: String,
    },

    /// The server was still listed once the teardown deadline passed.
    #[error("instance {instance_id} still present after teardown")]
    ResidualResource {
        /// Server id.
        instance_id: String,
    },

    /// The API answered with an error, or could not be reached.
    #[error("provider error [{code}]: {message}")]
    Provider {
        /// Scaleway error type (e.g. `invalid_arguments`), the HTTP status
        /// when the body had none, or `transport`.
        code: String,
        /// Message from the API or the HTTP client.
        message: String,
    },
}

impl ScalewayBackendError {
    /// Wraps a failure that happened before the API answered.
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Provider {
            code: String::from("transport"),
            message: err.to_string(),
        }
    }
}

impl From<ScalewayApiError> for ScalewayBackendError {
    fn from(value: ScalewayApiError) -> Self {
        Self::Provider {
            code: value.etype,
            message: value.message,
        }
    }
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        match value {
            ScalewayError::Api(api_err) => api_err.into(),
            other => Self::transport(other),
        }
    }
}

impl From<BackendError> for ScalewayBackendError {
    fn from(value: BackendError) -> Self {
        let BackendError::Validation(field) = value;
        Self::Validation(field)
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
