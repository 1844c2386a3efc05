use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::provider::{ProviderConfig, RetryConfig};
use crate::state::{BackendConfig, LockConfig};

/// A raw configuration value, as written in TOML or on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
  Bool(bool),
  Integer(i64),
  Float(f64),
  String(String),
  List(Vec<ConfigValue>),
  Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
  pub fn type_name(&self) -> &'static str {
    match self {
      ConfigValue::Bool(_) => "bool",
      ConfigValue::Integer(_) => "integer",
      ConfigValue::Float(_) => "number",
      ConfigValue::String(_) => "string",
      ConfigValue::List(_) => "list",
      ConfigValue::Map(_) => "map",
    }
  }
}

impl From<&str> for ConfigValue {
  fn from(value: &str) -> Self {
    ConfigValue::String(value.to_string())
  }
}

impl From<i64> for ConfigValue {
  fn from(value: i64) -> Self {
    ConfigValue::Integer(value)
  }
}

impl From<f64> for ConfigValue {
  fn from(value: f64) -> Self {
    ConfigValue::Float(value)
  }
}

impl From<bool> for ConfigValue {
  fn from(value: bool) -> Self {
    ConfigValue::Bool(value)
  }
}

/// A string that is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self {
    Secret(value.into())
  }

  pub fn expose(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(crate::value::REDACTED)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
  String,
  Number,
  Bool,
  StringMap,
}

impl VariableType {
  pub fn as_str(self) -> &'static str {
    match self {
      VariableType::String => "string",
      VariableType::Number => "number",
      VariableType::Bool => "bool",
      VariableType::StringMap => "map of strings",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
  Required,
  Null,
  Str(&'static str),
  Num(f64),
  Bool(bool),
  EmptyMap,
}

impl DefaultValue {
  pub fn to_value(self) -> Option<ConfigValue> {
    match self {
      DefaultValue::Required | DefaultValue::Null => None,
      DefaultValue::Str(s) => Some(ConfigValue::String(s.to_string())),
      DefaultValue::Num(n) if n.fract() == 0.0 => Some(ConfigValue::Integer(n as i64)),
      DefaultValue::Num(n) => Some(ConfigValue::Float(n)),
      DefaultValue::Bool(b) => Some(ConfigValue::Bool(b)),
      DefaultValue::EmptyMap => Some(ConfigValue::Map(BTreeMap::new())),
    }
  }
}

/// A declared configuration variable.
#[derive(Debug, Clone, Copy)]
pub struct VariableSpec {
  pub name: &'static str,
  pub ty: VariableType,
  pub default: DefaultValue,
  pub sensitive: bool,
  pub description: &'static str,
}

const fn var(name: &'static str, ty: VariableType, default: DefaultValue, description: &'static str) -> VariableSpec {
  VariableSpec {
    name,
    ty,
    default,
    sensitive: false,
    description,
  }
}

pub const VARIABLES: &[VariableSpec] = &[
  var(
    "prefix",
    VariableType::String,
    DefaultValue::Required,
    "Short project prefix used in every resource name",
  ),
  var(
    "environment",
    VariableType::String,
    DefaultValue::Str("dev"),
    "Environment name (dev, test, prod)",
  ),
  var(
    "location",
    VariableType::String,
    DefaultValue::Str("westeurope"),
    "Region for all resources",
  ),
  var(
    "image_name",
    VariableType::String,
    DefaultValue::Str("app"),
    "Repository of the application image in the registry",
  ),
  var(
    "image_tag",
    VariableType::String,
    DefaultValue::Str("latest"),
    "Tag of the application image",
  ),
  var(
    "acr_sku",
    VariableType::String,
    DefaultValue::Str("Basic"),
    "Container registry SKU",
  ),
  var(
    "log_retention_days",
    VariableType::Number,
    DefaultValue::Num(30.0),
    "Log retention in days",
  ),
  var("cpu", VariableType::Number, DefaultValue::Num(0.5), "vCPU per replica"),
  var(
    "memory",
    VariableType::String,
    DefaultValue::Str("1Gi"),
    "Memory per replica, twice the vCPU count",
  ),
  var(
    "min_replicas",
    VariableType::Number,
    DefaultValue::Num(1.0),
    "Minimum replica count",
  ),
  var(
    "max_replicas",
    VariableType::Number,
    DefaultValue::Num(1.0),
    "Maximum replica count",
  ),
  var(
    "app_port",
    VariableType::Number,
    DefaultValue::Num(8030.0),
    "Ingress target port, must match the port the application listens on",
  ),
  var(
    "pg_sku_name",
    VariableType::String,
    DefaultValue::Str("B_Standard_B1ms"),
    "PostgreSQL compute SKU",
  ),
  var(
    "pg_version",
    VariableType::String,
    DefaultValue::Str("16"),
    "PostgreSQL major version",
  ),
  var(
    "pg_storage_mb",
    VariableType::Number,
    DefaultValue::Num(32768.0),
    "PostgreSQL storage size in MB",
  ),
  var(
    "pg_admin_login",
    VariableType::String,
    DefaultValue::Str("pgadmin"),
    "PostgreSQL administrator login",
  ),
  VariableSpec {
    name: "pg_admin_password",
    ty: VariableType::String,
    default: DefaultValue::Null,
    sensitive: true,
    description: "PostgreSQL administrator password, generated when omitted",
  },
  var(
    "pg_public_access",
    VariableType::Bool,
    DefaultValue::Bool(true),
    "Expose the database to Azure services",
  ),
  var(
    "tags",
    VariableType::StringMap,
    DefaultValue::EmptyMap,
    "Extra tags applied to every resource",
  ),
];

pub fn variable_spec(name: &str) -> Option<&'static VariableSpec> {
  VARIABLES.iter().find(|spec| spec.name == name)
}

/// The validated environment configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentConfig {
  pub prefix: String,
  pub environment: String,
  pub location: String,
  pub image_name: String,
  pub image_tag: String,
  pub acr_sku: String,
  pub log_retention_days: u32,
  pub cpu: f64,
  pub memory: String,
  pub min_replicas: u32,
  pub max_replicas: u32,
  pub app_port: u16,
  pub pg_sku_name: String,
  pub pg_version: String,
  pub pg_storage_mb: u32,
  pub pg_admin_login: String,
  pub pg_admin_password: Option<Secret>,
  pub pg_public_access: bool,
  pub tags: BTreeMap<String, String>,
}

impl EnvironmentConfig {
  /// Tags applied to every resource: user tags plus the managed ones.
  pub fn resource_tags(&self) -> BTreeMap<String, String> {
    let mut tags = self.tags.clone();
    tags.insert("environment".to_string(), self.environment.clone());
    tags.insert("project".to_string(), self.prefix.clone());
    tags.insert("managed_by".to_string(), crate::consts::APP_NAME.to_string());
    tags
  }
}

/// Parsed `infragraph.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
  pub variables: BTreeMap<String, ConfigValue>,
  pub backend: BackendConfig,
  pub provider: ProviderConfig,
  pub retry: RetryConfig,
  pub lock: LockConfig,
  /// Directory relative paths in the file are resolved against.
  #[serde(skip)]
  pub base_dir: PathBuf,
}
