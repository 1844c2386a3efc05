//! Values flowing through resource declarations.
//!
//! A [`Value`] is a literal, a reference to another node's output, a string
//! template interpolating references, or one of two planning markers:
//! [`Value::Sensitive`] wraps a payload that must never be displayed, and
//! [`Value::Unknown`] stands for something that only exists after apply.
//!
//! `Debug` and `Display` both go through [`Value::render`], so a sensitive
//! payload cannot leak through logging or error formatting.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::NodeId;

/// Placeholder printed in place of sensitive payloads.
pub const REDACTED: &str = "(sensitive value)";

/// Placeholder printed for values that are only known after apply.
pub const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// A reference to a named output of another node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
  pub node: NodeId,
  pub output: String,
}

impl Reference {
  pub fn new(node: impl Into<NodeId>, output: impl Into<String>) -> Self {
    Self {
      node: node.into(),
      output: output.into(),
    }
  }
}

impl fmt::Display for Reference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "${{{}.{}}}", self.node, self.output)
  }
}

/// A piece of a string template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Segment {
  Literal(String),
  Ref(Reference),
}

impl Segment {
  pub fn literal(text: impl Into<String>) -> Self {
    Segment::Literal(text.into())
  }

  pub fn reference(node: impl Into<NodeId>, output: impl Into<String>) -> Self {
    Segment::Ref(Reference::new(node, output))
  }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
  String(String),
  Number(f64),
  Bool(bool),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
  Ref(Reference),
  Template(Vec<Segment>),
  Sensitive(Box<Value>),
  Unknown,
}

/// Source of output values while resolving references.
///
/// Implemented over the state snapshot during apply and over planned outputs
/// while diffing.
pub trait OutputLookup {
  /// Returns the value of the referenced output, or `None` when the node has
  /// no realized outputs yet.
  fn lookup(&self, reference: &Reference) -> Option<Value>;
}

impl Value {
  pub fn reference(node: impl Into<NodeId>, output: impl Into<String>) -> Self {
    Value::Ref(Reference::new(node, output))
  }

  /// Wraps a value as sensitive. Wrapping twice is a no-op.
  pub fn sensitive(value: impl Into<Value>) -> Self {
    match value.into() {
      wrapped @ Value::Sensitive(_) => wrapped,
      other => Value::Sensitive(Box::new(other)),
    }
  }

  pub fn template(segments: Vec<Segment>) -> Self {
    Value::Template(segments)
  }

  pub fn map<I, K, V>(entries: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
  {
    Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }

  pub fn list<I, V>(items: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    Value::List(items.into_iter().map(Into::into).collect())
  }

  /// All references contained in this value, in order of appearance.
  pub fn references(&self) -> Vec<&Reference> {
    let mut out = Vec::new();
    self.collect_references(&mut out);
    out
  }

  fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
    match self {
      Value::Ref(reference) => out.push(reference),
      Value::Template(segments) => {
        for segment in segments {
          if let Segment::Ref(reference) = segment {
            out.push(reference);
          }
        }
      }
      Value::List(items) => items.iter().for_each(|item| item.collect_references(out)),
      Value::Map(entries) => entries.values().for_each(|item| item.collect_references(out)),
      Value::Sensitive(inner) => inner.collect_references(out),
      _ => {}
    }
  }

  /// True when the value is, or contains, a sensitive payload.
  pub fn is_sensitive(&self) -> bool {
    match self {
      Value::Sensitive(_) => true,
      Value::List(items) => items.iter().any(Value::is_sensitive),
      Value::Map(entries) => entries.values().any(Value::is_sensitive),
      _ => false,
    }
  }

  /// True when the value is fully concrete: no unknowns and no unresolved
  /// references or templates.
  pub fn is_known(&self) -> bool {
    match self {
      Value::Unknown | Value::Ref(_) | Value::Template(_) => false,
      Value::List(items) => items.iter().all(Value::is_known),
      Value::Map(entries) => entries.values().all(Value::is_known),
      Value::Sensitive(inner) => inner.is_known(),
      _ => true,
    }
  }

  /// Substitutes references with the values `lookup` provides.
  ///
  /// Missing outputs become [`Value::Unknown`]. Sensitivity carried by a
  /// looked-up value is kept, and a template interpolating a sensitive value
  /// becomes sensitive as a whole.
  pub fn resolve(&self, lookup: &dyn OutputLookup) -> Value {
    match self {
      Value::Ref(reference) => lookup.lookup(reference).unwrap_or(Value::Unknown),
      Value::Template(segments) => resolve_template(segments, lookup),
      Value::List(items) => Value::List(items.iter().map(|item| item.resolve(lookup)).collect()),
      Value::Map(entries) => Value::Map(
        entries
          .iter()
          .map(|(key, item)| (key.clone(), item.resolve(lookup)))
          .collect(),
      ),
      Value::Sensitive(inner) => Value::sensitive(inner.resolve(lookup)),
      other => other.clone(),
    }
  }

  /// The value with any sensitive wrapper removed.
  pub fn plain(&self) -> &Value {
    match self {
      Value::Sensitive(inner) => inner.plain(),
      other => other,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  /// Text used when the value is spliced into a template.
  fn interpolate(&self) -> Option<String> {
    match self {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(format_number(*n)),
      Value::Bool(b) => Some(b.to_string()),
      _ => None,
    }
  }

  /// Plaintext JSON for handing to a provider. Sensitive payloads are
  /// unwrapped, so the result must never be logged.
  pub fn reveal(&self) -> serde_json::Value {
    self.to_json(false)
  }

  /// JSON with sensitive payloads and unknowns replaced by placeholders.
  pub fn redacted(&self) -> serde_json::Value {
    self.to_json(true)
  }

  fn to_json(&self, redact: bool) -> serde_json::Value {
    use serde_json::Value as Json;
    match self {
      Value::String(s) => Json::String(s.clone()),
      Value::Number(n) => number_to_json(*n),
      Value::Bool(b) => Json::Bool(*b),
      Value::List(items) => Json::Array(items.iter().map(|item| item.to_json(redact)).collect()),
      Value::Map(entries) => Json::Object(
        entries
          .iter()
          .map(|(key, item)| (key.clone(), item.to_json(redact)))
          .collect(),
      ),
      Value::Ref(_) | Value::Template(_) => Json::String(self.render()),
      Value::Sensitive(_) if redact => Json::String(REDACTED.to_string()),
      Value::Sensitive(inner) => inner.to_json(redact),
      Value::Unknown if redact => Json::String(KNOWN_AFTER_APPLY.to_string()),
      Value::Unknown => Json::Null,
    }
  }

  /// Converts provider JSON into a value. `null` becomes [`Value::Unknown`].
  pub fn from_json(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
      Json::Null => Value::Unknown,
      Json::Bool(b) => Value::Bool(*b),
      Json::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
      Json::String(s) => Value::String(s.clone()),
      Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
      Json::Object(entries) => Value::Map(
        entries
          .iter()
          .map(|(key, item)| (key.clone(), Value::from_json(item)))
          .collect(),
      ),
    }
  }

  /// Human-readable rendering with sensitive payloads redacted.
  pub fn render(&self) -> String {
    match self {
      Value::String(s) => format!("{s:?}"),
      Value::Number(n) => format_number(*n),
      Value::Bool(b) => b.to_string(),
      Value::List(items) => {
        let inner: Vec<String> = items.iter().map(Value::render).collect();
        format!("[{}]", inner.join(", "))
      }
      Value::Map(entries) if entries.is_empty() => "{}".to_string(),
      Value::Map(entries) => {
        let inner: Vec<String> = entries
          .iter()
          .map(|(key, item)| format!("{key} = {}", item.render()))
          .collect();
        format!("{{ {} }}", inner.join(", "))
      }
      Value::Ref(reference) => reference.to_string(),
      Value::Template(segments) => {
        let mut out = String::from("\"");
        for segment in segments {
          match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Ref(reference) => out.push_str(&reference.to_string()),
          }
        }
        out.push('"');
        out
      }
      Value::Sensitive(_) => REDACTED.to_string(),
      Value::Unknown => KNOWN_AFTER_APPLY.to_string(),
    }
  }
}

fn resolve_template(segments: &[Segment], lookup: &dyn OutputLookup) -> Value {
  let mut text = String::new();
  let mut sensitive = false;

  for segment in segments {
    match segment {
      Segment::Literal(literal) => text.push_str(literal),
      Segment::Ref(reference) => {
        let value = lookup.lookup(reference);
        sensitive |= value.as_ref().is_some_and(Value::is_sensitive);
        match value.and_then(|value| value.plain().interpolate()) {
          Some(part) => text.push_str(&part),
          None if sensitive => return Value::sensitive(Value::Unknown),
          None => return Value::Unknown,
        }
      }
    }
  }

  if sensitive {
    Value::sensitive(Value::String(text))
  } else {
    Value::String(text)
  }
}

/// Formats whole numbers without a trailing `.0`.
pub(crate) fn format_number(n: f64) -> String {
  if n.fract() == 0.0 && n.abs() < 1e15 {
    format!("{}", n as i64)
  } else {
    n.to_string()
  }
}

fn number_to_json(n: f64) -> serde_json::Value {
  if n.fract() == 0.0 && n.abs() < 1e15 {
    serde_json::Value::from(n as i64)
  } else {
    serde_json::Value::from(n)
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.render())
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.render())
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::String(value.to_string())
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::String(value)
  }
}

impl From<&String> for Value {
  fn from(value: &String) -> Self {
    Value::String(value.clone())
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Value::Number(value)
  }
}

impl From<u16> for Value {
  fn from(value: u16) -> Self {
    Value::Number(f64::from(value))
  }
}

impl From<u32> for Value {
  fn from(value: u32) -> Self {
    Value::Number(f64::from(value))
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

impl From<Reference> for Value {
  fn from(value: Reference) -> Self {
    Value::Ref(value)
  }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
  fn from(value: BTreeMap<String, V>) -> Self {
    Value::Map(value.into_iter().map(|(k, v)| (k, v.into())).collect())
  }
}
