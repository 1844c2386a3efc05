//! State, output and force-unlock integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn state_list_names_every_resource() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["state", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("resource_group"))
    .stdout(predicate::str::contains("container_app"))
    .stdout(predicate::str::contains("11 resource(s), serial"));
}

#[test]
fn state_list_json_reports_lineage() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  let output = env.cmd().args(["state", "list", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert!(json["lineage"].is_string());
  assert!(json["serial"].as_u64().unwrap() >= 1);
  assert_eq!(json["resources"].as_array().unwrap().len(), 11);
}

#[test]
fn state_show_redacts_secrets() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  let output = env
    .cmd()
    .args(["state", "show", "db_password", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["kind"], "random_password");
  assert_eq!(json["outputs"]["result"], "(sensitive value)");
}

#[test]
fn state_show_unknown_resource_fails() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["state", "show", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No resource 'nope'"));
}

#[test]
fn state_pull_without_state_warns() {
  let env = TestEnv::from_fixture("fitapp.toml");

  env
    .cmd()
    .args(["state", "pull"])
    .assert()
    .success()
    .stderr(predicate::str::contains("No state has been written yet."));
}

#[test]
fn output_redacts_unless_raw() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["output", "database_connection_string"])
    .assert()
    .success()
    .stdout(predicate::str::contains("(sensitive value)"))
    .stdout(predicate::str::contains("postgresql://").not());

  env
    .cmd()
    .args(["output", "database_connection_string", "--raw"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with("postgresql://pgadmin:"));
}

#[test]
fn output_unknown_name_lists_known_outputs() {
  let env = TestEnv::from_fixture("fitapp.toml");
  env.apply();

  env
    .cmd()
    .args(["output", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("app_url"));
}

#[test]
fn force_unlock_releases_stale_lock() {
  let env = TestEnv::from_fixture("fitapp.toml");
  let now = std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap()
    .as_secs();
  let lock = serde_json::json!({
    "id": "3f1c2a9e-crashed-run",
    "owner": "ci@runner",
    "operation": "apply",
    "pid": 4242,
    "created_at": now,
    "expires_at": now + 3600,
  });
  env.write_file("home/state.json.lock", &lock.to_string());

  env
    .cmd()
    .args(["apply", "--auto-approve"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("state is locked by ci@runner"))
    .stderr(predicate::str::contains("infragraph force-unlock 3f1c2a9e-crashed-run"));

  env
    .cmd()
    .args(["force-unlock", "wrong-id", "--force"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("does not match"));

  env
    .cmd()
    .args(["force-unlock", "3f1c2a9e-crashed-run", "--force"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Released lock 3f1c2a9e-crashed-run."));

  env.apply();
}
