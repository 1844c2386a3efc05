//! Validate command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn validate_reports_resources_and_waves() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .arg("validate")
    .assert()
    .success()
    .stdout(predicate::str::contains("The configuration is valid."))
    .stdout(predicate::str::contains("Resources: 11"));
}

#[test]
fn validate_json_lists_waves_in_dependency_order() {
  let env = TestEnv::from_fixture("fitapp.toml");

  let output = env.cmd().args(["validate", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["valid"], true);
  assert_eq!(json["resources"], 11);

  let waves = json["waves"].as_array().unwrap();
  let first = waves[0].as_array().unwrap();
  assert!(first.contains(&serde_json::json!("resource_group")));
  assert!(!first.contains(&serde_json::json!("container_app")));
  let last = waves.last().unwrap().as_array().unwrap();
  assert!(last.contains(&serde_json::json!("container_app")));
}

#[test]
fn validate_rejects_wrong_port() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .args(["validate", "--var", "app_port=9000"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("8030"));
}

#[test]
fn validate_json_failure_is_machine_readable() {
  let env = TestEnv::from_fixture("fitapp.toml");

  let output = env
    .cmd()
    .args(["validate", "-o", "json", "--var", "max_replicas=0"])
    .output()
    .unwrap();
  assert!(!output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["valid"], false);
  assert!(json["error"].as_str().unwrap().contains("max_replicas"));
}

#[test]
fn validate_rejects_malformed_override() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .args(["validate", "--var", "no-equals-sign"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no-equals-sign"));
}

#[test]
fn validate_reads_variables_from_environment() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .arg("validate")
    .env("INFRAGRAPH_VAR_app_port", "9000")
    .assert()
    .failure()
    .stderr(predicate::str::contains("8030"));
}
