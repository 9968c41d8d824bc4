//! Provider abstraction for the cloud side of the VM lifecycle.
//!
//! A cloud VM owns two remote resources: one compute instance and one
//! ingress policy that opens the SSH port for the duration of the run. The
//! [`Backend`] trait exposes exactly the calls needed to create and release
//! that pair, so `CloudVm` stays provider-neutral and tests can script
//! failures.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// What to boot and where. Every field but `organisation_id` is required.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Provider image id, or a label resolved against `architecture`.
    pub image: String,
    /// Commercial type, e.g. `DEV1-S`.
    pub instance_type: String,
    /// Availability zone, e.g. `fr-par-1`. The ingress policy lives here too.
    pub zone: String,
    /// Project billed for the instance and its policy.
    pub project_id: String,
    /// Owning organisation, for accounts that need it on create calls.
    pub organisation_id: Option<String>,
    /// CPU architecture the image must match, e.g. `x86_64`.
    pub architecture: String,
}

impl InstanceRequest {
    /// Starts an empty [`InstanceRequestBuilder`].
    #[must_use]
    pub fn builder() -> InstanceRequestBuilder {
        InstanceRequestBuilder::default()
    }

    /// Names the first blank required field, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] carrying the field name.
    pub fn validate(&self) -> Result<(), BackendError> {
        let required = [
            ("image", &self.image),
            ("instance_type", &self.instance_type),
            ("zone", &self.zone),
            ("project_id", &self.project_id),
            ("architecture", &self.architecture),
        ];
        match required
            .into_iter()
            .find(|(_, value)| value.trim().is_empty())
        {
            Some((field, _)) => Err(BackendError::Validation(field.to_owned())),
            None => Ok(()),
        }
    }

    /// Describes the per-run ingress policy, placed in the same zone and
    /// project as the instance.
    #[must_use]
    pub fn access_policy_request(&self, name: impl Into<String>) -> AccessPolicyRequest {
        AccessPolicyRequest {
            name: name.into(),
            description: String::from("vmtest ephemeral security group: SSH rule"),
            zone: self.zone.clone(),
            project_id: self.project_id.clone(),
            organisation_id: self.organisation_id.clone(),
        }
    }
}

macro_rules! string_setters {
    ($($(#[$doc:meta])* $field:ident),+ $(,)?) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $field(mut self, value: impl Into<String>) -> Self {
                self.draft.$field = value.into();
                self
            }
        )+
    };
}

/// Collects [`InstanceRequest`] fields as typed on the command line or in
/// `vmtest.toml`; [`build`](Self::build) trims and checks them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceRequestBuilder {
    draft: InstanceRequest,
}

impl InstanceRequestBuilder {
    string_setters! {
        /// Image id or label.
        image,
        /// Commercial type.
        instance_type,
        /// Availability zone.
        zone,
        /// Project id.
        project_id,
        /// CPU architecture.
        architecture,
    }

    /// Owning organisation. Blank values count as unset.
    #[must_use]
    pub fn organisation_id(mut self, value: Option<String>) -> Self {
        self.draft.organisation_id = value;
        self
    }

    /// Trims every value and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] naming the first blank required
    /// field.
    pub fn build(self) -> Result<InstanceRequest, BackendError> {
        let mut request = self.draft;
        for value in [
            &mut request.image,
            &mut request.instance_type,
            &mut request.zone,
            &mut request.project_id,
            &mut request.architecture,
        ] {
            *value = value.trim().to_owned();
        }
        request.organisation_id = request
            .organisation_id
            .map(|org| org.trim().to_owned())
            .filter(|org| !org.is_empty());
        request.validate()?;
        Ok(request)
    }
}

/// Parameters for the ephemeral ingress policy owned by one VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessPolicyRequest {
    /// Unique name for this run.
    pub name: String,
    /// Free-form description stored with the policy.
    pub description: String,
    /// Zone the policy lives in; must match the instance zone.
    pub zone: String,
    /// Project owning the policy.
    pub project_id: String,
    /// Optional organisation owning the policy.
    pub organisation_id: Option<String>,
}

/// A created ingress policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessPolicyHandle {
    /// Provider specific identifier for the policy.
    pub id: String,
    /// Zone in which the policy was created.
    pub zone: String,
}

/// A created instance, booted or not. Whoever holds it must destroy it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider id.
    pub id: String,
    /// Zone the instance lives in.
    pub zone: String,
}

/// Where SSH can reach a running instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceNetworking {
    /// Public address.
    pub public_ip: IpAddr,
    /// Port the ingress policy opened.
    pub ssh_port: u16,
}

/// Request problems caught before any provider call.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// A required [`InstanceRequest`] field is blank.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Guest port opened for SSH unless a backend says otherwise.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Boxed future so [`Backend`] stays object safe and `Send`.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Cloud provider calls needed to run one disposable VM.
pub trait Backend {
    /// Provider failure type, surfaced through `VmError::Provider`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Guest port that ingress is authorised for and SSH listens on.
    fn ssh_port(&self) -> u16 {
        DEFAULT_SSH_PORT
    }

    /// Creates an empty ingress policy.
    fn create_access_policy<'a>(
        &'a self,
        request: &'a AccessPolicyRequest,
    ) -> BackendFuture<'a, AccessPolicyHandle, Self::Error>;

    /// Allows inbound TCP on `port` from any address.
    fn authorize_ingress<'a>(
        &'a self,
        policy: &'a AccessPolicyHandle,
        port: u16,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Deletes the policy. Must only be called once no instance uses it.
    fn delete_access_policy(&self, policy: AccessPolicyHandle) -> BackendFuture<'_, (), Self::Error>;

    /// Creates a new instance attached to `policy` without booting it.
    ///
    /// The handle is returned as soon as the provider has allocated the
    /// instance so the caller owns it before anything else can fail.
    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
        policy: &'a AccessPolicyHandle,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error>;

    /// Boots a created instance. Succeeds without a call when it already
    /// runs.
    fn power_on<'a>(&'a self, handle: &'a InstanceHandle) -> BackendFuture<'a, (), Self::Error>;

    /// Blocks until the instance reports running and returns its address.
    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> BackendFuture<'a, InstanceNetworking, Self::Error>;

    /// Terminates the instance and waits until the provider no longer
    /// lists it.
    fn destroy(&self, handle: InstanceHandle) -> BackendFuture<'_, (), Self::Error>;
}
