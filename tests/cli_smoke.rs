//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("buildvm");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("connect"));
}

#[test]
fn missing_subcommand_prints_usage() {
    let mut cmd = cargo_bin_cmd!("buildvm");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn malformed_tag_fails_before_contacting_the_provider() {
    let mut cmd = cargo_bin_cmd!("buildvm");
    cmd.args(["tag", "--id", "42", "--zone", "us-central1-a", "novalue"])
        .env_remove("BUILDVM_GOOGLE_PROJECT_ID")
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("invalid tag `novalue`"));
}

#[test]
fn destroy_requires_an_identifier() {
    let mut cmd = cargo_bin_cmd!("buildvm");
    cmd.arg("destroy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<ID>"));
}
