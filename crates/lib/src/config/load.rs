use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::{ConfigValue, ProjectConfig, ValidationError};
use crate::consts::VAR_ENV_PREFIX;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {}", path.display())]
  NotFound { path: PathBuf },

  #[error("failed to read config file {}: {source}", path.display())]
  Read { path: PathBuf, source: std::io::Error },

  #[error("failed to parse config file {}: {source}", path.display())]
  Parse { path: PathBuf, source: toml::de::Error },
}

impl ProjectConfig {
  /// Load and parse a configuration file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::NotFound {
        path: path.to_path_buf(),
      });
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config = Self::parse(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.base_dir = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));

    info!(path = %path.display(), variables = config.variables.len(), "config loaded");
    Ok(config)
  }

  /// Load `path`, falling back to an empty configuration when it does not
  /// exist and was not explicitly requested.
  pub fn load_or_default(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
    if !explicit && !path.exists() {
      debug!(path = %path.display(), "no config file, using defaults");
      return Ok(Self {
        base_dir: PathBuf::from("."),
        ..Self::default()
      });
    }
    Self::load(path)
  }

  pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Resolve a path from the file relative to the file's directory.
  pub fn resolve_path(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.base_dir.join(path)
    }
  }

  /// Merge file variables with the process environment and CLI overrides.
  pub fn variables_with_overrides(&self, overrides: &[String]) -> Result<BTreeMap<String, ConfigValue>, ValidationError> {
    collect_variables(&self.variables, std::env::vars(), overrides)
  }
}

/// Merge variable sources in precedence order: file, then
/// `INFRAGRAPH_VAR_<name>` environment variables, then `name=value`
/// overrides. Declared defaults are applied later, during validation.
pub fn collect_variables(
  file: &BTreeMap<String, ConfigValue>,
  environment: impl IntoIterator<Item = (String, String)>,
  overrides: &[String],
) -> Result<BTreeMap<String, ConfigValue>, ValidationError> {
  let mut values = file.clone();

  let mut from_env: Vec<(String, String)> = environment
    .into_iter()
    .filter_map(|(key, value)| key.strip_prefix(VAR_ENV_PREFIX).map(|name| (name.to_string(), value)))
    .filter(|(name, _)| !name.is_empty())
    .collect();
  from_env.sort();
  for (name, raw) in from_env {
    debug!(variable = %name, "variable set from environment");
    values.insert(name, parse_override_value(&raw));
  }

  let mut problems = Vec::new();
  for raw in overrides {
    match raw.split_once('=') {
      Some((name, value)) if !name.trim().is_empty() => {
        values.insert(name.trim().to_string(), parse_override_value(value));
      }
      _ => problems.push(ValidationError::MalformedOverride(raw.clone())),
    }
  }

  if problems.is_empty() {
    Ok(values)
  } else {
    Err(ValidationError::from_problems(problems))
  }
}

/// Parse a command-line value as a TOML value expression, falling back to a
/// plain string: `9000` is a number, `false` a bool, `{a = "b"}` a map and
/// `fitapp` a string.
pub fn parse_override_value(raw: &str) -> ConfigValue {
  #[derive(Deserialize)]
  struct Wrapper {
    v: ConfigValue,
  }

  match toml::from_str::<Wrapper>(&format!("v = {raw}")) {
    Ok(wrapper) => wrapper.v,
    Err(_) => ConfigValue::String(raw.to_string()),
  }
}
