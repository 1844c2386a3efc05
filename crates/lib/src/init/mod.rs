//! Initialize a new infragraph project directory.
//!
//! This module provides the core logic for the `init` command, which
//! scaffolds a project with:
//! - `infragraph.toml` with every variable and the local backend
//! - `.gitignore` entries keeping state and saved plans out of version control

mod templates;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::DEFAULT_CONFIG_FILE;

pub use templates::{CONFIG_TEMPLATE, GITIGNORE_TEMPLATE};

/// Errors that can occur during initialization.
#[derive(Debug, Error)]
pub enum InitError {
  #[error("file already exists: {}", path.display())]
  PathExists { path: PathBuf },

  #[error("failed to create directory {}: {source}", path.display())]
  CreateDir { path: PathBuf, source: std::io::Error },

  #[error("failed to write file {}: {source}", path.display())]
  WriteFile { path: PathBuf, source: std::io::Error },

  #[error("failed to read file {}: {source}", path.display())]
  ReadFile { path: PathBuf, source: std::io::Error },

  #[error("cannot derive a prefix from '{0}': use 2 to 12 lowercase letters or digits")]
  InvalidPrefix(String),
}

/// Options for initializing a project directory.
pub struct InitOptions {
  /// Directory to create the project in.
  pub dir: PathBuf,
  /// Resource name prefix. Derived from the directory name when absent.
  pub prefix: Option<String>,
  pub environment: String,
}

/// Result of a successful initialization.
#[derive(Debug)]
pub struct InitResult {
  pub dir: PathBuf,
  /// Path to the created `infragraph.toml`.
  pub config_file: PathBuf,
  pub prefix: String,
  /// Path to `.gitignore`, when it was created or extended.
  pub gitignore: Option<PathBuf>,
}

/// Write a template configuration into `options.dir`.
///
/// # Errors
///
/// Returns an error if `infragraph.toml` already exists, no valid prefix
/// can be derived, or a file cannot be written.
pub fn init(options: &InitOptions) -> Result<InitResult, InitError> {
  let dir = &options.dir;
  fs::create_dir_all(dir).map_err(|source| InitError::CreateDir {
    path: dir.clone(),
    source,
  })?;

  let config_file = dir.join(DEFAULT_CONFIG_FILE);
  if config_file.exists() {
    return Err(InitError::PathExists { path: config_file });
  }

  let prefix = match &options.prefix {
    Some(prefix) => prefix.clone(),
    None => derive_prefix(dir)?,
  };
  if !valid_prefix(&prefix) {
    return Err(InitError::InvalidPrefix(prefix));
  }

  let content = CONFIG_TEMPLATE
    .replace("{prefix}", &prefix)
    .replace("{environment}", &options.environment);
  fs::write(&config_file, content).map_err(|source| InitError::WriteFile {
    path: config_file.clone(),
    source,
  })?;

  let gitignore = update_gitignore(dir)?;

  info!(path = %config_file.display(), %prefix, "project initialized");
  Ok(InitResult {
    dir: dir.clone(),
    config_file,
    prefix,
    gitignore,
  })
}

fn valid_prefix(prefix: &str) -> bool {
  (2..=12).contains(&prefix.len())
    && prefix
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Lowercase alphanumerics of the directory name, truncated to 12.
fn derive_prefix(dir: &Path) -> Result<String, InitError> {
  let name = dir
    .canonicalize()
    .ok()
    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
    .unwrap_or_default();

  let prefix: String = name
    .chars()
    .filter(char::is_ascii_alphanumeric)
    .map(|c| c.to_ascii_lowercase())
    .take(12)
    .collect();

  if valid_prefix(&prefix) {
    debug!(%prefix, dir = %dir.display(), "prefix derived from directory name");
    Ok(prefix)
  } else {
    Err(InitError::InvalidPrefix(name))
  }
}

/// Append the ignore entries unless `.gitignore` already has them.
fn update_gitignore(dir: &Path) -> Result<Option<PathBuf>, InitError> {
  let path = dir.join(".gitignore");
  let existing = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
    Err(source) => return Err(InitError::ReadFile { path, source }),
  };

  if existing.lines().any(|line| line.trim() == ".infragraph/") {
    return Ok(None);
  }

  let mut content = existing;
  if !content.is_empty() && !content.ends_with('\n') {
    content.push('\n');
  }
  content.push_str(GITIGNORE_TEMPLATE);
  fs::write(&path, content).map_err(|source| InitError::WriteFile {
    path: path.clone(),
    source,
  })?;
  Ok(Some(path))
}
