//! Settings for `vmtest cloud`, loaded via `ortho-config`.
//!
//! Credentials and placement keep Scaleway's own `SCW_DEFAULT_*` variable
//! names so an existing `scw` setup works unchanged. What to boot and how
//! long to wait for it are vmtest's own keys under the same prefix.

use std::net::IpAddr;
use std::time::Duration;

use crate::backend::InstanceRequest;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Scaleway account, instance shape and provisioning budgets.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "vmtest",
        env_var = "VMTEST_CONFIG_PATH",
        config_file_name = "vmtest.toml",
        dotfile_name = ".vmtest.toml",
        project_file_name = "vmtest.toml"
    )
)]
pub struct ScalewayConfig {
    /// API secret key.
    pub secret_key: String,
    /// Organisation owning the VM, for accounts that still require one.
    pub default_organization_id: Option<String>,
    /// Project the instance and its security group are billed to.
    pub default_project_id: String,
    /// Availability zone for the instance and its security group.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type of the VM. The smallest development type keeps test
    /// runs cheap.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub instance_type: String,
    /// Image identifier, or a label such as `Ubuntu 24.04 Noble Numbat`
    /// resolved to the newest matching image.
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub image: String,
    /// Guest architecture, used to pick the image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub architecture: String,
    /// Guest port opened in the security group and used for SSH.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Source range allowed to reach `ssh_port`.
    #[ortho_config(default = "0.0.0.0/0".to_owned())]
    pub ingress_cidr: String,
    /// Seconds between provider status polls.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Seconds to wait for the VM to get a public address, and for a
    /// terminated VM to disappear.
    #[ortho_config(default = 300)]
    pub ready_timeout_secs: u64,
}

impl Default for ScalewayConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            default_organization_id: None,
            default_project_id: String::new(),
            default_zone: String::from("fr-par-1"),
            instance_type: String::from("DEV1-S"),
            image: String::from("Ubuntu 24.04 Noble Numbat"),
            architecture: String::from("x86_64"),
            ssh_port: 22,
            ingress_cidr: String::from("0.0.0.0/0"),
            poll_interval_secs: 5,
            ready_timeout_secs: 300,
        }
    }
}

impl ScalewayConfig {
    /// Loads configuration from defaults, `vmtest.toml`, the environment and
    /// process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration like [`Self::load_from_sources`] but ignores the
    /// process arguments, which belong to the `vmtest` CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("vmtest")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Delay between provider status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Budget for each provider-side wait.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Builds the [`InstanceRequest`] for one VM.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_request(&self) -> Result<InstanceRequest, ConfigError> {
        self.validate()?;
        InstanceRequest::builder()
            .image(&self.image)
            .instance_type(&self.instance_type)
            .zone(&self.default_zone)
            .project_id(&self.default_project_id)
            .organisation_id(self.default_organization_id.clone())
            .architecture(&self.architecture)
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that every required value is present and that the numeric
    /// settings are usable. Missing values name the environment variable and
    /// `vmtest.toml` key that would supply them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for a blank required value and
    /// [`ConfigError::Invalid`] for an unusable one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (what, key, value) in self.required() {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "missing {what}: set SCW_{} or add {key} to [scaleway] in vmtest.toml",
                    key.to_ascii_uppercase()
                )));
            }
        }
        if self.ssh_port == 0 {
            return Err(invalid("ssh_port", "must be a TCP port between 1 and 65535"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be at least one second"));
        }
        if self.ready_timeout_secs < self.poll_interval_secs {
            return Err(invalid(
                "ready_timeout_secs",
                "must not be shorter than poll_interval_secs",
            ));
        }
        if !is_cidr(&self.ingress_cidr) {
            return Err(invalid("ingress_cidr", "expected ADDRESS/PREFIX, e.g. 0.0.0.0/0"));
        }
        Ok(())
    }

    fn required(&self) -> [(&'static str, &'static str, &str); 6] {
        [
            ("Scaleway API secret key", "secret_key", self.secret_key.as_str()),
            ("Scaleway project ID", "default_project_id", self.default_project_id.as_str()),
            ("VM image", "image", self.image.as_str()),
            ("instance type", "instance_type", self.instance_type.as_str()),
            ("availability zone", "default_zone", self.default_zone.as_str()),
            ("CPU architecture", "architecture", self.architecture.as_str()),
        ]
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid(format!("{key} {reason}"))
}

fn is_cidr(value: &str) -> bool {
    let Some((address, prefix)) = value.trim().split_once('/') else {
        return false;
    };
    let (Ok(address), Ok(prefix)) = (address.parse::<IpAddr>(), prefix.parse::<u8>()) else {
        return false;
    };
    match address {
        IpAddr::V4(_) => prefix <= 32,
        IpAddr::V6(_) => prefix <= 128,
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required value is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A value is present but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The `ortho-config` loader failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
