//! Lifecycle tests for `QemuVm` using a stand-in emulator binary.

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::remote::SshConfig;
use crate::test_support::write_script;

struct Harness {
    bin_dir: TempDir,
    config: SshConfig,
}

impl Harness {
    fn vm(&self, options: QemuOptions) -> QemuVm {
        let executor =
            RemoteExecutor::with_process_runner(self.config.clone()).expect("config should validate");
        QemuVm::new(options, executor).expect("vm should be created")
    }

    fn options(&self, body: &str) -> QemuOptions {
        let binary = write_script(self.bin_dir.path(), "qemu", body).expect("fake qemu");
        QemuOptions {
            arch: Some(String::from("x86_64")),
            binary: Some(binary.into_string()),
            ..QemuOptions::new("/images/disk.qcow2")
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        bin_dir: TempDir::new().expect("temp dir"),
        config: SshConfig {
            reachability_timeout_secs: 0,
            ..SshConfig::default()
        },
    }
}

#[rstest]
fn workdir_is_named_after_image_and_removed_on_drop(harness: Harness) {
    let vm = harness.vm(QemuOptions::new("/images/fedora.qcow2"));
    let workdir = vm.workdir().to_path_buf();
    let name = workdir
        .file_name()
        .and_then(|name| name.to_str())
        .expect("utf8 dir name")
        .to_owned();

    assert!(name.starts_with("vmtest-"), "{name}");
    assert!(name.ends_with("-fedora.qcow2"), "{name}");
    assert_eq!(vm.qmp_socket_path().parent().map(|p| p.as_std_path()), Some(workdir.as_path()));

    drop(vm);
    assert!(!workdir.exists());
}

#[rstest]
#[tokio::test]
async fn unsupported_arch_fails_before_spawning(harness: Harness) {
    let mut vm = harness.vm(QemuOptions {
        arch: Some(String::from("mips")),
        ..harness.options("exit 1")
    });

    let err = vm.start().await.expect_err("start should fail");

    assert!(matches!(err, VmError::UnsupportedArchitecture { arch } if arch == "mips"));
    assert!(!vm.running());
    assert_eq!(vm.endpoint(), None);
}

#[rstest]
#[tokio::test]
async fn unsupported_image_fails_before_spawning(harness: Harness) {
    let mut vm = harness.vm(QemuOptions {
        image: Utf8PathBuf::from("/images/disk.vmdk"),
        ..harness.options("exit 1")
    });

    let err = vm.start().await.expect_err("start should fail");

    assert!(matches!(err, VmError::UnsupportedImageFormat { .. }));
    assert!(!vm.running());
}

#[rstest]
#[tokio::test]
async fn missing_emulator_is_a_spawn_error(harness: Harness) {
    let mut vm = harness.vm(QemuOptions {
        binary: Some(String::from("/nonexistent/qemu-system-x86_64")),
        ..harness.options("exit 1")
    });

    let err = vm.start().await.expect_err("start should fail");

    assert!(matches!(err, VmError::Spawn { .. }), "{err:?}");
}

#[rstest]
#[tokio::test]
async fn failed_ssh_wait_kills_the_process(harness: Harness) {
    let mut vm = harness.vm(harness.options("exec sleep 60"));

    let err = vm.start().await.expect_err("nothing listens on the port");

    assert!(
        matches!(err, VmError::Readiness(crate::poller::ReadinessError::Unreachable { .. })),
        "{err:?}"
    );
    assert!(!vm.running());
    assert_eq!(vm.ssh_port(), None);
}

#[rstest]
#[tokio::test]
async fn force_stop_before_start_is_a_no_op(harness: Harness) {
    let mut vm = harness.vm(harness.options("exit 1"));

    vm.force_stop().await.expect("nothing to stop");
    vm.force_stop().await.expect("still nothing to stop");

    assert!(!vm.running());
    assert_eq!(vm.endpoint(), None);
    assert_eq!(vm.ssh_port(), None);
    assert!(vm.workdir().exists());
}

#[cfg(feature = "qmp")]
#[rstest]
#[tokio::test]
async fn qmp_wait_returns_on_event_and_force_stop_is_idempotent(harness: Harness) {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    let mut vm = harness.vm(harness.options("exec sleep 60"));
    let listener = UnixListener::bind(vm.qmp_socket_path()).expect("bind qmp socket");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        write_half
            .write_all(b"{\"QMP\": {\"version\": {}, \"capabilities\": []}}\n")
            .await
            .expect("greeting");
        lines.next_line().await.expect("read").expect("capabilities");
        write_half
            .write_all(b"{\"return\": {}}\n{\"event\": \"STOP\"}\n")
            .await
            .expect("events");
    });

    vm.start_with(QemuStart {
        wait: WaitMode::QmpEvent(String::from("STOP")),
        ..QemuStart::default()
    })
    .await
    .expect("start should succeed");
    server.await.expect("server task");

    assert!(vm.running());
    let port = vm.ssh_port().expect("port while running");
    assert_eq!(vm.endpoint(), Some(SshEndpoint::new("localhost", port)));

    vm.start().await.expect("second start is a no-op");
    assert_eq!(vm.ssh_port(), Some(port));

    vm.force_stop().await.expect("stop");
    assert!(!vm.running());
    assert_eq!(vm.endpoint(), None);
    vm.force_stop().await.expect("second stop is a no-op");
}

#[cfg(not(feature = "qmp"))]
#[rstest]
#[tokio::test]
async fn qmp_wait_requires_feature(harness: Harness) {
    let mut vm = harness.vm(harness.options("exec sleep 60"));

    let err = vm
        .start_with(QemuStart {
            wait: WaitMode::QmpEvent(String::from("STOP")),
            ..QemuStart::default()
        })
        .await
        .expect_err("qmp is compiled out");

    assert!(matches!(err, VmError::EventWaitUnavailable { .. }));
    assert!(!vm.running());
}

#[rstest]
#[case("ssh", Some(WaitMode::Ssh))]
#[case("qmp:SHUTDOWN", Some(WaitMode::QmpEvent(String::from("SHUTDOWN"))))]
#[case("qmp:", None)]
#[case("qmp", None)]
#[case("serial:login", None)]
fn wait_mode_parses(#[case] value: &str, #[case] expected: Option<WaitMode>) {
    match expected {
        Some(mode) => {
            assert_eq!(value.parse::<WaitMode>().expect("mode"), mode);
            assert_eq!(mode.to_string(), value);
        }
        None => assert!(matches!(
            value.parse::<WaitMode>(),
            Err(VmError::UnsupportedWaitMode { mode }) if mode == value
        )),
    }
}

#[rstest]
fn free_port_is_nonzero() {
    assert_ne!(free_port().expect("port"), 0);
}
