//! Working directory layout.
//!
//! Everything infragraph writes lives under one home directory:
//! `$INFRAGRAPH_HOME` when set, otherwise `./.infragraph`.

use std::path::PathBuf;

use crate::consts::{APP_NAME, HOME_ENV};

/// Returns the working directory for state, the local cloud and saved plans.
pub fn home_dir() -> PathBuf {
  match std::env::var_os(HOME_ENV) {
    Some(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => PathBuf::from(format!(".{APP_NAME}")),
  }
}

/// Default location of the local state snapshot.
pub fn default_state_path() -> PathBuf {
  home_dir().join("state.json")
}

/// Default root of the directory-backed cloud.
pub fn default_cloud_root() -> PathBuf {
  home_dir().join("cloud")
}

/// Directory `plan --out` writes relative plan files to.
pub fn plans_dir() -> PathBuf {
  home_dir().join("plans")
}
