//! Destroy command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn destroy_without_state_is_a_noop() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .args(["destroy", "--auto-approve"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to destroy."));
}

#[test]
fn destroy_dry_run_keeps_resources() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["destroy", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("11 to destroy"))
    .stdout(predicate::str::contains("Dry run: nothing was destroyed."));

  env
    .cmd()
    .args(["state", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("11 resource(s)"));
}

#[test]
fn destroy_requires_approval_when_not_interactive() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .arg("destroy")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--auto-approve"));
}

#[test]
fn destroy_removes_everything() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["destroy", "--auto-approve"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Destroy complete! 11 resource(s) destroyed."));

  env
    .cmd()
    .args(["state", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No resources in the state."));

  // A fresh apply starts over.
  env
    .cmd()
    .args(["plan"])
    .assert()
    .success()
    .stdout(predicate::str::contains("11 to add"));
}
