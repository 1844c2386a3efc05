use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ValidationError;
use crate::resource::{NodeId, ResourceDeclaration};
use crate::util::hash::Hashable;
use crate::value::{OutputLookup, Value};

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("dependency cycle between {}", join_ids(.members))]
  Cycle { members: Vec<NodeId> },

  #[error(transparent)]
  Invalid(#[from] ValidationError),
}

fn join_ids(ids: &[NodeId]) -> String {
  ids.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", ")
}

/// A root output exposed by the graph, e.g. the application URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDeclaration {
  pub value: Value,
  #[serde(default)]
  pub sensitive: bool,
  #[serde(default)]
  pub description: String,
}

/// Resource declarations in declaration order, plus root outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
  pub nodes: Vec<ResourceDeclaration>,
  #[serde(default)]
  pub outputs: BTreeMap<String, OutputDeclaration>,
}

impl Hashable for ResourceGraph {}

impl ResourceGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, declaration: ResourceDeclaration) {
    self.nodes.push(declaration);
  }

  pub fn add_output(&mut self, name: &str, value: impl Into<Value>, sensitive: bool, description: &str) {
    self.outputs.insert(
      name.to_string(),
      OutputDeclaration {
        value: value.into(),
        sensitive,
        description: description.to_string(),
      },
    );
  }

  pub fn get(&self, id: &str) -> Option<&ResourceDeclaration> {
    self.nodes.iter().find(|node| node.id.as_str() == id)
  }

  pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
    self.nodes.iter().map(|node| &node.id)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Root output values. Outputs declared sensitive are wrapped even when
  /// the resolved value is not.
  pub fn resolve_outputs(&self, lookup: &dyn OutputLookup) -> BTreeMap<String, Value> {
    self
      .outputs
      .iter()
      .map(|(name, output)| {
        let value = output.value.resolve(lookup);
        let value = if output.sensitive { Value::sensitive(value) } else { value };
        (name.clone(), value)
      })
      .collect()
  }
}
