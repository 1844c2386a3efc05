use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ResourceKind;
use crate::value::{OutputLookup, Reference, Value};

/// Stable identifier of a node in the resource graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for NodeId {
  fn from(value: &str) -> Self {
    NodeId(value.to_string())
  }
}

impl From<String> for NodeId {
  fn from(value: String) -> Self {
    NodeId(value)
  }
}

impl From<&NodeId> for NodeId {
  fn from(value: &NodeId) -> Self {
    value.clone()
  }
}

impl Borrow<str> for NodeId {
  fn borrow(&self) -> &str {
    &self.0
  }
}

/// A desired resource: its kind and the inputs it should be realized with.
///
/// Dependencies are not declared separately; they are the nodes referenced
/// from `inputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
  pub id: NodeId,
  pub kind: ResourceKind,
  pub inputs: BTreeMap<String, Value>,
}

impl ResourceDeclaration {
  pub fn new(id: impl Into<NodeId>, kind: ResourceKind) -> Self {
    Self {
      id: id.into(),
      kind,
      inputs: BTreeMap::new(),
    }
  }

  pub fn with_input(mut self, name: &str, value: impl Into<Value>) -> Self {
    self.inputs.insert(name.to_string(), value.into());
    self
  }

  /// Every `(attribute, reference)` pair in the inputs.
  pub fn references(&self) -> impl Iterator<Item = (&str, &Reference)> {
    self
      .inputs
      .iter()
      .flat_map(|(name, value)| value.references().into_iter().map(move |r| (name.as_str(), r)))
  }

  pub fn dependencies(&self) -> BTreeSet<NodeId> {
    self.references().map(|(_, r)| r.node.clone()).collect()
  }

  pub fn resolve_inputs(&self, lookup: &dyn OutputLookup) -> BTreeMap<String, Value> {
    self
      .inputs
      .iter()
      .map(|(name, value)| (name.clone(), value.resolve(lookup)))
      .collect()
  }
}
