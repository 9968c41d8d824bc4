//! Unit tests for Scaleway lifecycle helpers.

use std::collections::HashMap;

use rstest::rstest;
use scaleway_rs::{ScalewayApi, ScalewayImage};

use super::InstanceSnapshot;
use crate::ScalewayConfig;
use crate::backend::{Backend, InstanceRequest};
use crate::scaleway::types::{ServerAction, ServerState};
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};

fn server(state: &str, allowed: &[&str]) -> InstanceSnapshot {
    InstanceSnapshot {
        id: String::from("srv-1"),
        state: ServerState::from(state.to_owned()),
        allowed_actions: allowed.iter().copied().map(ServerAction::from).collect(),
        public_ip: None,
    }
}

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn test_config() -> ScalewayConfig {
    ScalewayConfig {
        secret_key: String::from("dummy"),
        default_project_id: String::from("proj"),
        default_zone: String::from("zone"),
        instance_type: String::from("type"),
        image: String::from("img"),
        ..ScalewayConfig::default()
    }
}

fn base_request() -> InstanceRequest {
    InstanceRequest {
        image: String::from("label"),
        instance_type: String::from("type"),
        zone: String::from("zone"),
        project_id: String::from("proj"),
        organisation_id: None,
        architecture: String::from("x86_64"),
    }
}

fn backend_with(config: ScalewayConfig) -> ScalewayBackend {
    ScalewayBackend {
        api: ScalewayApi::new("dummy"),
        config,
    }
}

fn backend_fixture() -> ScalewayBackend {
    backend_with(test_config())
}

#[tokio::test]
async fn running_server_needs_no_power_on() {
    let result = backend_fixture()
        .power_on_if_needed("zone", &server("running", &[]))
        .await;
    assert!(result.is_ok());
}

#[rstest]
#[case::stopped_without_action("stopped", "stopped")]
#[case::locked("locked", "locked")]
#[tokio::test]
async fn server_that_refuses_power_on_reports_its_state(#[case] state: &str, #[case] reported: &str) {
    let result = backend_fixture()
        .power_on_if_needed("zone", &server(state, &["terminate"]))
        .await;
    assert!(matches!(
        result,
        Err(ScalewayBackendError::PowerOnNotAllowed { ref instance_id, ref state })
            if instance_id == "srv-1" && state == reported
    ));
}

#[test]
fn snapshot_matches_typed_actions() {
    let snap = server("stopped", &["poweron", "reboot"]);
    assert!(snap.allows(&ServerAction::PowerOn));
    assert!(!snap.allows(&ServerAction::Terminate));
    assert!(!snap.is_running());
}

#[test]
fn backend_opens_the_configured_ssh_port() {
    let backend = backend_with(ScalewayConfig {
        ssh_port: 2222,
        ..test_config()
    });
    assert_eq!(Backend::ssh_port(&backend), 2222);
}

#[test]
fn backend_rejects_unusable_settings() {
    let err = ScalewayBackend::new(ScalewayConfig {
        ingress_cidr: String::from("everywhere"),
        ..test_config()
    })
    .expect_err("invalid range should be refused");
    assert!(
        matches!(err, ScalewayBackendError::Config(ref message) if message.contains("ingress_cidr")),
        "{err}"
    );
}

mod image;
