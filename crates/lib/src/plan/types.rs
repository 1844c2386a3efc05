use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::GraphError;
use crate::provider::ProviderError;
use crate::resource::{NodeId, ResourceKind};
use crate::state::StateVersion;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("failed to refresh '{node}': {source}")]
  Refresh {
    node: NodeId,
    #[source]
    source: ProviderError,
  },

  #[error("failed to read plan {}: {source}", .path.display())]
  Read { path: PathBuf, source: std::io::Error },

  #[error("failed to write plan {}: {source}", .path.display())]
  Write { path: PathBuf, source: std::io::Error },

  #[error("failed to parse plan {}: {source}", .path.display())]
  Parse { path: PathBuf, source: serde_json::Error },

  #[error("failed to serialize plan: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("plan format version {found} is not supported (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("plan {} has been modified since it was written", .path.display())]
  Corrupt { path: PathBuf },

  #[error("plan was computed against state {expected} but the state is now {actual}; run plan again")]
  Stale { expected: StateVersion, actual: StateVersion },
}

/// What happens to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeAction {
  NoOp,
  Create,
  Update,
  Replace,
  Delete,
}

impl ChangeAction {
  pub fn as_str(self) -> &'static str {
    match self {
      ChangeAction::NoOp => "no-op",
      ChangeAction::Create => "create",
      ChangeAction::Update => "update",
      ChangeAction::Replace => "replace",
      ChangeAction::Delete => "delete",
    }
  }

  pub fn is_change(self) -> bool {
    self != ChangeAction::NoOp
  }
}

impl fmt::Display for ChangeAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Why a node got its action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
  Unchanged,
  /// Not in the state snapshot.
  New,
  /// Recorded in state but gone from the provider.
  Deleted,
  /// Inputs differ from what was recorded or refreshed.
  Changed,
  /// Recorded in state but no longer declared.
  Orphaned,
  /// Created by an operation that failed before the resource was ready.
  Tainted,
}

impl fmt::Display for ChangeReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ChangeReason::Unchanged => "unchanged",
      ChangeReason::New => "not in state",
      ChangeReason::Deleted => "deleted outside of infragraph",
      ChangeReason::Changed => "inputs changed",
      ChangeReason::Orphaned => "no longer declared",
      ChangeReason::Tainted => "tainted by a failed operation",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
  pub name: String,
  pub old: Option<Value>,
  pub new: Option<Value>,
  pub forces_replacement: bool,
  pub sensitive: bool,
}

impl AttributeChange {
  pub fn new(kind: ResourceKind, name: &str, old: Option<Value>, new: Option<Value>) -> Self {
    let sensitive = old.iter().chain(new.iter()).any(Value::is_sensitive);
    Self {
      name: name.to_string(),
      forces_replacement: kind.policy(name) == crate::resource::ChangePolicy::ForceReplace,
      sensitive,
      old,
      new,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
  pub id: NodeId,
  pub kind: ResourceKind,
  pub action: ChangeAction,
  /// Changed attributes; every desired attribute for a create, every
  /// recorded one for a delete.
  pub attributes: Vec<AttributeChange>,
  pub reason: ChangeReason,
  /// Some inputs are only known after an upstream node is applied. The
  /// action is decided again once they are.
  pub pending: bool,
}

impl PlannedChange {
  pub fn replacing_attributes(&self) -> impl Iterator<Item = &str> {
    self
      .attributes
      .iter()
      .filter(|a| a.forces_replacement)
      .map(|a| a.name.as_str())
  }
}

/// A difference between the snapshot and what the provider reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "drift", rename_all = "snake_case")]
pub enum StateDrift {
  Deleted {
    node: NodeId,
  },
  Modified {
    node: NodeId,
    /// Attributes whose live value differs, with that live value.
    attributes: Vec<(String, serde_json::Value)>,
  },
}

impl StateDrift {
  pub fn node(&self) -> &NodeId {
    match self {
      StateDrift::Deleted { node } | StateDrift::Modified { node, .. } => node,
    }
  }
}

impl fmt::Display for StateDrift {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StateDrift::Deleted { node } => write!(f, "{node} has been deleted outside of infragraph"),
      StateDrift::Modified { node, attributes } => {
        let names: Vec<&str> = attributes.iter().map(|(name, _)| name.as_str()).collect();
        write!(f, "{node} has changed outside of infragraph ({})", names.join(", "))
      }
    }
  }
}

/// The operations needed to reconcile the state with the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  /// Deletes of orphaned nodes first, then every declared node in
  /// dependency order.
  pub changes: Vec<PlannedChange>,
  pub drift: Vec<StateDrift>,
  /// Root outputs as far as they are known before apply.
  pub outputs: BTreeMap<String, Value>,
  /// The snapshot revision the plan was computed against.
  pub state_version: StateVersion,
}

impl Plan {
  pub fn has_changes(&self) -> bool {
    self.changes.iter().any(|c| c.action.is_change())
  }

  pub fn count(&self, action: ChangeAction) -> usize {
    self.changes.iter().filter(|c| c.action == action).count()
  }

  pub fn get(&self, id: &str) -> Option<&PlannedChange> {
    self.changes.iter().find(|c| c.id.as_str() == id)
  }

  /// Changes that are not no-ops.
  pub fn operations(&self) -> impl Iterator<Item = &PlannedChange> {
    self.changes.iter().filter(|c| c.action.is_change())
  }
}
