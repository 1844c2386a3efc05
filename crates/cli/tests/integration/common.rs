//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own project directory. State, the local cloud and
/// saved plans go to `home/` inside it.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Create from a fixture, copied to `infragraph.toml`.
  pub fn from_fixture(name: &str) -> Self {
    let env = Self::empty();
    env.write_file("infragraph.toml", &fixture_content(name));
    env
  }

  /// A project directory without a config file.
  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// `INFRAGRAPH_HOME` for this test.
  pub fn home_path(&self) -> PathBuf {
    let p = self.temp.path().join("home");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn state_path(&self) -> PathBuf {
    self.home_path().join("state.json")
  }

  /// Get a pre-configured Command for the infragraph binary.
  ///
  /// Runs in the project directory with an isolated `INFRAGRAPH_HOME` and
  /// a non-terminal stdin, so confirmation prompts fail instead of
  /// blocking.
  pub fn cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("infragraph");
    cmd.current_dir(self.temp.path());
    cmd.env("INFRAGRAPH_HOME", self.home_path());
    cmd.env_remove("RUST_LOG");
    cmd.write_stdin("");
    cmd
  }

  /// Apply the project without prompting.
  pub fn apply(&self) {
    self.cmd().args(["apply", "--auto-approve"]).assert().success();
  }
}
