//! Live tests against the Scaleway API.
//!
//! These provision real resources and are ignored by default. Run them with
//! `SCW_SECRET_KEY`, `SCW_DEFAULT_PROJECT_ID` and `VMTEST_LIVE_SSH_KEY` set:
//!
//! ```text
//! cargo test --test scaleway_backend -- --ignored
//! ```

use std::net::{IpAddr, Ipv4Addr};

use rstest::{fixture, rstest};
use vmtest::backend::Backend;
use vmtest::remote::{Login, RemoteCommand, RemoteExecutor, SshConfig};
use vmtest::vm::{CloudVm, Vm, VmError, with_vm};
use vmtest::{InstanceRequest, ScalewayBackend, ScalewayBackendError, ScalewayConfig};

#[fixture]
fn scaleway_config() -> ScalewayConfig {
    match ScalewayConfig::load_without_cli_args() {
        Ok(cfg) => cfg,
        Err(err) => panic!("failed to load Scaleway configuration: {err}"),
    }
}

#[fixture]
fn scaleway_backend(scaleway_config: ScalewayConfig) -> ScalewayBackend {
    match ScalewayBackend::new(scaleway_config) {
        Ok(backend) => backend,
        Err(err) => panic!("failed to construct backend: {err}"),
    }
}

#[fixture]
fn base_request(scaleway_config: ScalewayConfig) -> InstanceRequest {
    match scaleway_config.as_request() {
        Ok(request) => request,
        Err(err) => panic!("invalid base request: {err}"),
    }
}

fn live_login() -> Login {
    let key = std::env::var("VMTEST_LIVE_SSH_KEY")
        .unwrap_or_else(|err| panic!("missing VMTEST_LIVE_SSH_KEY: {err}"));
    Login::with_key_file("root", key)
}

#[rstest]
#[ignore = "provisions a real Scaleway instance"]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cloud_vm_runs_command_and_cleans_up(
    scaleway_backend: ScalewayBackend,
    base_request: InstanceRequest,
) {
    let executor = RemoteExecutor::with_process_runner(SshConfig::default())
        .expect("default ssh config should validate");
    let vm = CloudVm::new(scaleway_backend, base_request, executor);
    let login = live_login();

    let output = with_vm(vm, async |vm: &mut CloudVm<ScalewayBackend>| -> Result<String, VmError> {
        vm.start().await?;
        let endpoint = vm.endpoint().expect("running vm has an endpoint");
        let address: IpAddr = endpoint.host.parse().expect("endpoint is an address");
        assert!(matches!(address, IpAddr::V4(ip) if ip != Ipv4Addr::UNSPECIFIED));
        let output = vm.run(&RemoteCommand::from("uname -s"), &login).await?;
        Ok(output.output)
    })
    .await
    .expect("remote command should succeed");

    assert!(output.contains("Linux"), "unexpected output: {output}");
}

#[rstest]
#[ignore = "calls the Scaleway API"]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_image_label_is_rejected(
    scaleway_backend: ScalewayBackend,
    base_request: InstanceRequest,
) {
    let policy_request = base_request.access_policy_request("vmtest-live-image-check");
    let policy = scaleway_backend
        .create_access_policy(&policy_request)
        .await
        .expect("security group should be created");
    let request = InstanceRequest {
        image: String::from("no-such-image-label"),
        ..base_request
    };

    let result = scaleway_backend.create(&request, &policy).await;

    scaleway_backend
        .delete_access_policy(policy)
        .await
        .expect("security group should be deleted");
    assert!(matches!(result, Err(ScalewayBackendError::ImageNotFound { .. })));
}
