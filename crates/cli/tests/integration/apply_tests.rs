//! Apply command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn apply_creates_everything_and_prints_outputs() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .args(["apply", "--auto-approve"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete! 11 added, 0 changed, 0 replaced, 0 destroyed"))
    .stdout(predicate::str::contains("registry_login_server = \"acrfitappdev.azurecr.io\""))
    .stdout(predicate::str::contains("database_connection_string = (sensitive value)"))
    .stdout(predicate::str::contains("postgresql://").not());

  assert!(env.state_path().exists());
  assert!(!env.home_path().join("state.json.lock").exists());
}

#[test]
fn apply_requires_approval_when_not_interactive() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--auto-approve"));

  assert!(!env.state_path().exists());
}

#[test]
fn apply_is_idempotent() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["apply", "--auto-approve"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes."));
}

#[test]
fn apply_updates_in_place() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["apply", "--auto-approve", "--var", "max_replicas=3"])
    .assert()
    .success()
    .stdout(predicate::str::contains("0 added, 1 changed, 0 replaced"));
}

#[test]
fn apply_with_invalid_config_touches_nothing() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .args(["apply", "--auto-approve", "--var", "app_port=9000"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("8030"));

  assert!(!env.state_path().exists());
  assert!(!env.home_path().join("cloud").exists());
}

#[test]
fn apply_private_database_with_supplied_password() {
  let env = TestEnv::from_fixture("private_db.toml");

  env
    .cmd()
    .args(["apply", "--auto-approve"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete! 9 added"));

  env
    .cmd()
    .args(["state", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("postgres_firewall_azure").not())
    .stdout(predicate::str::contains("db_password").not());
}

#[test]
fn apply_missing_explicit_config_fails() {
  let env = TestEnv::empty();

  env
    .cmd()
    .args(["--config", "missing.toml", "apply", "--auto-approve"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing.toml"));
}
