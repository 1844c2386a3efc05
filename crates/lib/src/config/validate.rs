use std::collections::BTreeMap;

use thiserror::Error;

use super::{ConfigValue, EnvironmentConfig, Secret, VariableType, variable_spec, VARIABLES};
use crate::consts::{APP_LISTEN_PORT, MIN_PASSWORD_LENGTH};
use crate::resource::NodeId;

const ACR_SKUS: &[&str] = &["Basic", "Standard", "Premium"];
const PG_VERSIONS: &[&str] = &["12", "13", "14", "15", "16"];
const PG_STORAGE_TIERS: &[u32] = &[
  32768, 65536, 131072, 262144, 524288, 1048576, 2097152, 4193280, 4194304, 8388608, 16777216, 33553408,
];
const RESERVED_LOGINS: &[&str] = &[
  "azure_superuser",
  "azure_pg_admin",
  "admin",
  "administrator",
  "root",
  "guest",
  "public",
];

/// Configuration or graph content that cannot be provisioned.
///
/// Raised before any remote call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("missing required variable '{0}'")]
  Missing(String),

  #[error("undeclared variable '{0}'")]
  Undeclared(String),

  #[error("malformed override '{0}', expected NAME=VALUE")]
  MalformedOverride(String),

  #[error("variable '{name}' must be a {expected}, got {found}")]
  TypeMismatch {
    name: String,
    expected: &'static str,
    found: &'static str,
  },

  #[error("variable '{name}' is out of range: {reason}")]
  OutOfRange { name: String, reason: String },

  #[error("app_port {configured} does not match the port the application listens on ({expected})")]
  PortMismatch { configured: i64, expected: u16 },

  #[error("{0}")]
  Inconsistent(String),

  #[error("node '{0}' is declared more than once")]
  DuplicateNode(NodeId),

  #[error("node '{node}' has no attribute '{attribute}' for its kind")]
  UnknownAttribute { node: NodeId, attribute: String },

  #[error("node '{node}' attribute '{attribute}' references unknown node '{target}'")]
  UnknownNode {
    node: NodeId,
    attribute: String,
    target: NodeId,
  },

  #[error("node '{node}' attribute '{attribute}' references undeclared output '{target}.{output}'")]
  UnknownOutput {
    node: NodeId,
    attribute: String,
    target: NodeId,
    output: String,
  },

  #[error("node '{node}' attribute '{attribute}' references the node itself")]
  SelfReference { node: NodeId, attribute: String },

  #[error("node '{node}' places a sensitive value in attribute '{attribute}', which does not accept secrets")]
  SensitiveExposure { node: NodeId, attribute: String },

  #[error("output '{0}' carries a sensitive value but is not declared sensitive")]
  SensitiveOutput(String),

  #[error("output '{output}' references unknown node '{target}'")]
  OutputReference { output: String, target: NodeId },

  #[error("least privilege violated by '{node}': {reason}")]
  Privilege { node: NodeId, reason: String },

  #[error("{} configuration problems:\n{}", .0.len(), .0.iter().map(|p| format!("  - {p}")).collect::<Vec<_>>().join("\n"))]
  Multiple(Vec<ValidationError>),
}

impl ValidationError {
  /// Collapse a problem list into a single error.
  pub fn from_problems(mut problems: Vec<ValidationError>) -> Self {
    if problems.len() == 1 {
      problems.remove(0)
    } else {
      ValidationError::Multiple(problems)
    }
  }

  /// The individual problems, flattening [`ValidationError::Multiple`].
  pub fn problems(&self) -> Vec<&ValidationError> {
    match self {
      ValidationError::Multiple(inner) => inner.iter().flat_map(|p| p.problems()).collect(),
      other => vec![other],
    }
  }
}

/// Reads declared variables, recording every problem instead of stopping at
/// the first.
struct VariableReader<'a> {
  values: &'a BTreeMap<String, ConfigValue>,
  problems: Vec<ValidationError>,
}

impl<'a> VariableReader<'a> {
  fn raw(&mut self, name: &str) -> Option<ConfigValue> {
    if let Some(value) = self.values.get(name) {
      return Some(value.clone());
    }
    let spec = variable_spec(name)?;
    let default = spec.default.to_value();
    if default.is_none() && spec.default == super::DefaultValue::Required {
      self.problems.push(ValidationError::Missing(name.to_string()));
    }
    default
  }

  fn mismatch(&mut self, name: &str, ty: VariableType, found: &ConfigValue) {
    self.problems.push(ValidationError::TypeMismatch {
      name: name.to_string(),
      expected: ty.as_str(),
      found: found.type_name(),
    });
  }

  fn out_of_range(&mut self, name: &str, reason: impl Into<String>) {
    self.problems.push(ValidationError::OutOfRange {
      name: name.to_string(),
      reason: reason.into(),
    });
  }

  fn string(&mut self, name: &str) -> Option<String> {
    match self.raw(name)? {
      ConfigValue::String(s) => Some(s),
      // Numbers are accepted where strings are expected, e.g. `pg_version = 16`.
      ConfigValue::Integer(n) => Some(n.to_string()),
      other => {
        self.mismatch(name, VariableType::String, &other);
        None
      }
    }
  }

  fn number(&mut self, name: &str) -> Option<f64> {
    match self.raw(name)? {
      ConfigValue::Integer(n) => Some(n as f64),
      ConfigValue::Float(n) => Some(n),
      ConfigValue::String(s) => match s.trim().parse::<f64>() {
        Ok(n) => Some(n),
        Err(_) => {
          self.mismatch(name, VariableType::Number, &ConfigValue::String(s));
          None
        }
      },
      other => {
        self.mismatch(name, VariableType::Number, &other);
        None
      }
    }
  }

  fn integer(&mut self, name: &str, min: i64, max: i64) -> Option<i64> {
    let n = self.number(name)?;
    if n.fract() != 0.0 {
      self.out_of_range(name, format!("{n} is not a whole number"));
      return None;
    }
    let n = n as i64;
    if n < min || n > max {
      self.out_of_range(name, format!("{n} is outside {min}..={max}"));
      return None;
    }
    Some(n)
  }

  fn bool(&mut self, name: &str) -> Option<bool> {
    match self.raw(name)? {
      ConfigValue::Bool(b) => Some(b),
      ConfigValue::String(s) if s == "true" || s == "false" => Some(s == "true"),
      other => {
        self.mismatch(name, VariableType::Bool, &other);
        None
      }
    }
  }

  fn string_map(&mut self, name: &str) -> Option<BTreeMap<String, String>> {
    match self.raw(name)? {
      ConfigValue::Map(entries) => {
        let mut out = BTreeMap::new();
        for (key, value) in entries {
          match value {
            ConfigValue::String(s) => {
              out.insert(key, s);
            }
            other => {
              self.mismatch(&format!("{name}.{key}"), VariableType::String, &other);
              return None;
            }
          }
        }
        Some(out)
      }
      other => {
        self.mismatch(name, VariableType::StringMap, &other);
        None
      }
    }
  }

  /// A string that must be non-empty and satisfy `check`.
  fn checked_string(&mut self, name: &str, check: impl Fn(&str) -> Result<(), String>) -> Option<String> {
    let value = self.string(name)?;
    if value.is_empty() {
      self.out_of_range(name, "must not be empty");
      return None;
    }
    match check(&value) {
      Ok(()) => Some(value),
      Err(reason) => {
        self.out_of_range(name, reason);
        None
      }
    }
  }
}

fn lower_alphanumeric(max_len: usize) -> impl Fn(&str) -> Result<(), String> {
  move |value: &str| {
    if value.len() > max_len {
      return Err(format!("'{value}' is longer than {max_len} characters"));
    }
    if !value.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
      return Err(format!("'{value}' must contain only lowercase letters and digits"));
    }
    if !value.starts_with(|c: char| c.is_ascii_lowercase()) {
      return Err(format!("'{value}' must start with a letter"));
    }
    Ok(())
  }
}

fn one_of(allowed: &'static [&'static str]) -> impl Fn(&str) -> Result<(), String> {
  move |value: &str| {
    if allowed.contains(&value) {
      Ok(())
    } else {
      Err(format!("'{value}' is not one of {}", allowed.join(", ")))
    }
  }
}

fn any_text(_: &str) -> Result<(), String> {
  Ok(())
}

/// Parses a memory quantity such as `1Gi` or `0.5Gi` into gibibytes.
fn parse_memory_gi(value: &str) -> Option<f64> {
  value.strip_suffix("Gi")?.parse::<f64>().ok().filter(|n| *n > 0.0)
}

fn password_classes(password: &str) -> usize {
  [
    password.chars().any(|c| c.is_ascii_uppercase()),
    password.chars().any(|c| c.is_ascii_lowercase()),
    password.chars().any(|c| c.is_ascii_digit()),
    password.chars().any(|c| !c.is_ascii_alphanumeric()),
  ]
  .into_iter()
  .filter(|present| *present)
  .count()
}

impl EnvironmentConfig {
  /// Type-check and domain-check raw variable values.
  ///
  /// Every problem found is reported, wrapped in
  /// [`ValidationError::Multiple`] when there is more than one.
  pub fn from_values(values: &BTreeMap<String, ConfigValue>) -> Result<Self, ValidationError> {
    let mut r = VariableReader {
      values,
      problems: Vec::new(),
    };

    for name in values.keys() {
      if variable_spec(name).is_none() {
        r.problems.push(ValidationError::Undeclared(name.clone()));
      }
    }

    let prefix = r.checked_string("prefix", |v| {
      if v.len() < 2 {
        return Err(format!("'{v}' is shorter than 2 characters"));
      }
      lower_alphanumeric(12)(v)
    });
    let environment = r.checked_string("environment", lower_alphanumeric(8));
    let location = r.checked_string("location", any_text);
    let image_name = r.checked_string("image_name", any_text);
    let image_tag = r.checked_string("image_tag", any_text);
    let acr_sku = r.checked_string("acr_sku", one_of(ACR_SKUS));
    let log_retention_days = r.integer("log_retention_days", 30, 730);

    let cpu = r.number("cpu").filter(|cpu| {
      let valid = (0.25..=4.0).contains(cpu) && (cpu * 4.0).fract() == 0.0;
      if !valid {
        r.out_of_range("cpu", format!("{cpu} must be between 0.25 and 4 in steps of 0.25"));
      }
      valid
    });
    let memory = r.checked_string("memory", |v| match parse_memory_gi(v) {
      Some(_) => Ok(()),
      None => Err(format!("'{v}' is not a quantity like '1Gi'")),
    });
    if let (Some(cpu), Some(memory)) = (cpu, memory.as_deref()) {
      if let Some(gi) = parse_memory_gi(memory)
        && (gi - cpu * 2.0).abs() > f64::EPSILON
      {
        r.problems.push(ValidationError::Inconsistent(format!(
          "memory {memory} does not match cpu {cpu}: expected {}Gi",
          cpu * 2.0
        )));
      }
    }

    let min_replicas = r.integer("min_replicas", 0, 300);
    let max_replicas = r.integer("max_replicas", 1, 300);
    if let (Some(min), Some(max)) = (min_replicas, max_replicas)
      && min > max
    {
      r.problems.push(ValidationError::Inconsistent(format!(
        "min_replicas {min} is greater than max_replicas {max}"
      )));
    }

    let app_port = r.integer("app_port", 1, 65535).filter(|port| {
      let matches = *port == i64::from(APP_LISTEN_PORT);
      if !matches {
        r.problems.push(ValidationError::PortMismatch {
          configured: *port,
          expected: APP_LISTEN_PORT,
        });
      }
      matches
    });

    let pg_sku_name = r.checked_string("pg_sku_name", any_text);
    let pg_version = r.checked_string("pg_version", one_of(PG_VERSIONS));
    let pg_storage_mb = r.integer("pg_storage_mb", 0, i64::from(u32::MAX)).filter(|mb| {
      let valid = PG_STORAGE_TIERS.iter().any(|tier| i64::from(*tier) == *mb);
      if !valid {
        r.out_of_range("pg_storage_mb", format!("{mb} is not a supported storage tier"));
      }
      valid
    });
    let pg_admin_login = r.checked_string("pg_admin_login", |v| {
      if RESERVED_LOGINS.contains(&v) || v.starts_with("pg_") {
        return Err(format!("'{v}' is a reserved login"));
      }
      if !v.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(format!("'{v}' must start with a letter"));
      }
      Ok(())
    });

    let pg_admin_password = r.string("pg_admin_password").filter(|password| {
      let long_enough = password.chars().count() >= MIN_PASSWORD_LENGTH;
      let complex = password_classes(password) >= 3;
      if !long_enough {
        r.out_of_range(
          "pg_admin_password",
          format!("must be at least {MIN_PASSWORD_LENGTH} characters"),
        );
      } else if !complex {
        r.out_of_range(
          "pg_admin_password",
          "must mix at least three of: uppercase, lowercase, digits, symbols",
        );
      }
      long_enough && complex
    });
    let pg_public_access = r.bool("pg_public_access");
    let tags = r.string_map("tags");

    let config = (|| {
      Some(EnvironmentConfig {
        prefix: prefix?,
        environment: environment?,
        location: location?,
        image_name: image_name?,
        image_tag: image_tag?,
        acr_sku: acr_sku?,
        log_retention_days: u32::try_from(log_retention_days?).ok()?,
        cpu: cpu?,
        memory: memory?,
        min_replicas: u32::try_from(min_replicas?).ok()?,
        max_replicas: u32::try_from(max_replicas?).ok()?,
        app_port: u16::try_from(app_port?).ok()?,
        pg_sku_name: pg_sku_name?,
        pg_version: pg_version?,
        pg_storage_mb: u32::try_from(pg_storage_mb?).ok()?,
        pg_admin_login: pg_admin_login?,
        pg_admin_password: pg_admin_password.map(Secret::new),
        pg_public_access: pg_public_access?,
        tags: tags?,
      })
    })();

    match config {
      Some(config) if r.problems.is_empty() => Ok(config),
      _ if r.problems.is_empty() => Err(ValidationError::Inconsistent(
        "configuration could not be assembled".to_string(),
      )),
      _ => Err(ValidationError::from_problems(r.problems)),
    }
  }

  /// Names of every declared variable, in declaration order.
  pub fn declared_variables() -> impl Iterator<Item = &'static str> {
    VARIABLES.iter().map(|spec| spec.name)
  }
}
