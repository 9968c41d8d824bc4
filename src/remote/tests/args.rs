//! Tests for ssh/scp argument construction and exit-status mapping.

use camino::Utf8Path;
use rstest::rstest;

use super::super::*;
use super::fixtures::{base_config, endpoint};
use crate::test_support::ScriptedRunner;

fn executor(config: SshConfig) -> (RemoteExecutor<ScriptedRunner>, ScriptedRunner) {
    let runner = ScriptedRunner::new();
    let executor = RemoteExecutor::new(config, runner.clone()).expect("config should validate");
    (executor, runner)
}

#[rstest]
fn ssh_invocation_uses_fixed_options(base_config: SshConfig, endpoint: SshEndpoint) {
    let (executor, runner) = executor(base_config);
    runner.push_success();

    executor
        .execute(&endpoint, &Login::new("root"), &RemoteCommand::from("true"))
        .expect("command should succeed");

    let invocations = runner.invocations();
    let call = invocations.first().expect("ssh should be invoked");
    assert_eq!(call.program, "ssh");
    assert_eq!(
        call.command_string(),
        concat!(
            "ssh -p 2222 -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no ",
            "-o LogLevel=ERROR -o IdentitiesOnly=yes root@localhost true"
        )
    );
}

#[rstest]
fn argv_command_is_sent_as_one_quoted_argument(base_config: SshConfig, endpoint: SshEndpoint) {
    let (executor, runner) = executor(base_config);
    runner.push_success();

    executor
        .execute(
            &endpoint,
            &Login::new("root"),
            &RemoteCommand::argv(["echo", "this needs quoting"]),
        )
        .expect("command should succeed");

    let args = runner.invocations().remove(0).arg_strings();
    assert_eq!(
        args.last().map(String::as_str),
        Some("echo 'this needs quoting'")
    );
}

#[rstest]
fn password_login_prefixes_sshpass(base_config: SshConfig, endpoint: SshEndpoint) {
    let (executor, runner) = executor(base_config);
    runner.push_success();

    executor
        .execute(
            &endpoint,
            &Login::with_password("admin", "s3cret"),
            &RemoteCommand::from("true"),
        )
        .expect("command should succeed");

    let call = runner.invocations().remove(0);
    assert_eq!(call.program, "sshpass");
    let args = call.arg_strings();
    assert_eq!(args.get(..4), Some(&["-p", "s3cret", "ssh", "-p"].map(String::from)[..]));
    assert!(!args.contains(&String::from("-i")));
}

#[rstest]
fn empty_password_falls_back_to_plain_ssh(base_config: SshConfig, endpoint: SshEndpoint) {
    let (executor, runner) = executor(base_config);
    runner.push_success();

    executor
        .execute(
            &endpoint,
            &Login::with_password("admin", ""),
            &RemoteCommand::from("true"),
        )
        .expect("command should succeed");

    assert_eq!(runner.invocations().remove(0).program, "ssh");
}

#[rstest]
fn key_file_login_passes_identity(base_config: SshConfig, endpoint: SshEndpoint) {
    let (executor, runner) = executor(base_config);
    runner.push_success();

    executor
        .execute(
            &endpoint,
            &Login::with_key_file("fedora", "/keys/id_ed25519"),
            &RemoteCommand::from("true"),
        )
        .expect("command should succeed");

    let args = runner.invocations().remove(0).arg_strings();
    let position = args
        .iter()
        .position(|arg| arg == "-i")
        .expect("identity flag should be present");
    assert_eq!(
        args.get(position + 1).map(String::as_str),
        Some("/keys/id_ed25519")
    );
    assert!(args.contains(&String::from("fedora@localhost")));
}

#[rstest]
fn scp_uses_capital_port_flag_and_remote_target(base_config: SshConfig, endpoint: SshEndpoint) {
    let (executor, runner) = executor(base_config);
    runner.push_success();

    executor
        .copy(
            &endpoint,
            &Login::new("root"),
            Utf8Path::new("/tmp/payload.txt"),
            "/root/payload.txt",
        )
        .expect("copy should succeed");

    let call = runner.invocations().remove(0);
    assert_eq!(call.program, "scp");
    let args = call.arg_strings();
    assert_eq!(args.get(..2), Some(&["-P", "2222"].map(String::from)[..]));
    assert_eq!(
        args.get(args.len() - 2..),
        Some(&["/tmp/payload.txt", "root@localhost:/root/payload.txt"].map(String::from)[..])
    );
}

#[rstest]
fn scp_failure_does_not_leak_password(base_config: SshConfig, endpoint: SshEndpoint) {
    let (executor, runner) = executor(base_config);
    runner.push_output(Some(1), "scp: /root: Permission denied\n");

    let err = executor
        .copy(
            &endpoint,
            &Login::with_password("root", "hunter2"),
            Utf8Path::new("/tmp/a"),
            "/root/a",
        )
        .expect_err("copy should fail");

    assert!(!err.to_string().contains("hunter2"), "{err}");
    assert_eq!(err.output(), Some("scp: /root: Permission denied\n"));
}

#[rstest]
#[case::connection(Some(255), "connection")]
#[case::failure(Some(42), "failed")]
#[case::signal(None, "failed")]
fn exit_status_is_mapped(
    base_config: SshConfig,
    endpoint: SshEndpoint,
    #[case] code: Option<i32>,
    #[case] expected: &str,
) {
    let (executor, runner) = executor(base_config);
    runner.push_output(code, "boom\n");

    let err = executor
        .execute(&endpoint, &Login::new("root"), &RemoteCommand::from("false"))
        .expect_err("non-zero status should fail");

    match (expected, &err) {
        ("connection", RemoteError::Connection { host, port, output }) => {
            assert_eq!((host.as_str(), *port), ("localhost", 2222));
            assert_eq!(output, "boom\n");
        }
        ("failed", RemoteError::CommandFailed { command, exit_code, output, .. }) => {
            assert_eq!(command, "false");
            assert_eq!(*exit_code, code);
            assert_eq!(output, "boom\n");
        }
        _ => panic!("unexpected error for {expected}: {err:?}"),
    }
}

#[rstest]
#[case::ssh_bin("ssh_bin")]
#[case::scp_bin("scp_bin")]
#[case::sshpass_bin("sshpass_bin")]
fn blank_binary_is_rejected(base_config: SshConfig, #[case] field: &str) {
    let mut config = base_config;
    match field {
        "ssh_bin" => config.ssh_bin = String::from("  "),
        "scp_bin" => config.scp_bin = String::new(),
        _ => config.sshpass_bin = String::from("\t"),
    }

    let err = RemoteExecutor::new(config, ScriptedRunner::new()).expect_err("config should fail");
    assert_eq!(
        err,
        RemoteError::InvalidConfig {
            field: field.to_owned()
        }
    );
    assert!(err.to_string().contains(&format!("VMTEST_SSH_{}", field.to_uppercase())));
}

#[rstest]
fn zero_retry_budget_is_rejected(base_config: SshConfig) {
    let config = SshConfig {
        ready_retries: 0,
        ..base_config
    };
    assert!(matches!(
        config.validate(),
        Err(RemoteError::InvalidConfig { field }) if field == "ready_retries"
    ));
}

#[rstest]
fn readiness_reflects_configuration(base_config: SshConfig) {
    let config = SshConfig {
        ready_retries: 3,
        ready_retry_delay_secs: 2,
        reachability_timeout_secs: 45,
        reachability_poll_secs: 5,
        ..base_config
    };
    let readiness = config.readiness();
    assert_eq!(readiness.ssh.max_retries, 3);
    assert_eq!(readiness.ssh.retry_delay.as_secs(), 2);
    assert_eq!(readiness.reachability.max_wait.as_secs(), 45);
    assert_eq!(readiness.reachability.poll_interval.as_secs(), 5);
}

#[rstest]
fn default_readiness_matches_poller_defaults(base_config: SshConfig) {
    assert_eq!(base_config.readiness(), crate::poller::ReadinessConfig::default());
}
