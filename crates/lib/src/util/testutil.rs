//! Fixtures shared by unit tests.

use std::collections::BTreeMap;

use crate::config::{ConfigValue, EnvironmentConfig};

/// Variables of the `fitapp` development environment.
pub fn sample_values() -> BTreeMap<String, ConfigValue> {
  [
    ("prefix", ConfigValue::from("fitapp")),
    ("environment", ConfigValue::from("dev")),
    ("app_port", ConfigValue::from(8030i64)),
    ("min_replicas", ConfigValue::from(1i64)),
    ("max_replicas", ConfigValue::from(1i64)),
  ]
  .into_iter()
  .map(|(name, value)| (name.to_string(), value))
  .collect()
}

/// The validated `fitapp` configuration, with a generated database password.
pub fn sample_config() -> EnvironmentConfig {
  EnvironmentConfig::from_values(&sample_values()).expect("sample configuration is valid")
}
