//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn cli_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("vmtest");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("qemu").and(predicate::str::contains("cloud")));
}

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("vmtest");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn qemu_rejects_unknown_wait_mode() {
    let mut cmd = cargo_bin_cmd!("vmtest");
    cmd.args(["qemu", "disk.qcow2", "--wait", "serial"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("serial"));
}

#[test]
fn qemu_rejects_unsupported_image_format_before_booting() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut cmd = cargo_bin_cmd!("vmtest");
    cmd.current_dir(dir.path())
        .args(["qemu", "disk.vmdk", "--arch", "x86_64", "--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("disk.vmdk"));
}

#[test]
fn malformed_copy_is_rejected() {
    let mut cmd = cargo_bin_cmd!("vmtest");
    cmd.args(["qemu", "disk.qcow2", "--copy", "nocolon", "--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("expected SRC:DST"));
}
