//! Plan command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_without_state_creates_everything() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("Plan: 11 to add, 0 to change, 0 to replace, 0 to destroy."));

  // Planning never writes state or takes the lock.
  assert!(!env.state_path().exists());
  assert!(!env.home_path().join("state.json.lock").exists());
}

#[test]
fn detailed_exitcode_reflects_pending_changes() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env.cmd().args(["plan", "--detailed-exitcode"]).assert().code(2);

  env.apply();

  env
    .cmd()
    .args(["plan", "--detailed-exitcode"])
    .assert()
    .code(0)
    .stdout(predicate::str::contains("No changes."));
}

#[test]
fn plan_json_redacts_sensitive_inputs() {
  let env = TestEnv::from_fixture("fitapp.toml");

  let output = env.cmd().args(["plan", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let changes = json["changes"].as_array().unwrap();
  assert_eq!(changes.len(), 11);
  assert!(changes.iter().all(|c| c["action"] == "create"));
  assert_eq!(json["serial"], 0);

  let server = changes.iter().find(|c| c["id"] == "postgres_server").unwrap();
  let password = server["attributes"]
    .as_array()
    .unwrap()
    .iter()
    .find(|a| a["name"] == "administrator_password")
    .unwrap();
  assert_eq!(password["sensitive"], true);
  assert!(password["new"].is_string());
}

#[test]
fn saved_plan_applies_without_prompt() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .args(["plan", "--out", "release.plan"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Saved the plan to"));
  assert!(env.home_path().join("plans").join("release.plan").exists());

  env
    .cmd()
    .args(["apply", "release.plan"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete! 11 added"));
}

#[test]
fn stale_saved_plan_is_refused() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env.cmd().args(["plan", "--out", "old.plan"]).assert().success();
  env.apply();

  env
    .cmd()
    .args(["apply", "old.plan"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("run plan again"));
}

#[test]
fn plan_shows_changed_attribute() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["plan", "--var", "max_replicas=3"])
    .assert()
    .success()
    .stdout(predicate::str::contains("max_replicas: 1 → 3"))
    .stdout(predicate::str::contains("1 to change"));
}
