use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::{NodeId, ResourceKind};
use crate::value::{OutputLookup, Reference, Value};

/// Current on-disk format of [`StateSnapshot`].
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read state {location}: {source}")]
  Read { location: String, source: std::io::Error },

  #[error("failed to write state {location}: {source}")]
  Write { location: String, source: std::io::Error },

  #[error("failed to parse state {location}: {source}")]
  Parse {
    location: String,
    source: serde_json::Error,
  },

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("state format version {found} is not supported (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("state backend request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("state backend returned HTTP {status}: {body}")]
  Http { status: u16, body: String },
}

/// Persisted record of realized resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
  pub version: u32,
  /// Fixed when the snapshot is first created.
  pub lineage: String,
  /// Incremented on every persisted write.
  pub serial: u64,
  #[serde(default)]
  pub resources: BTreeMap<NodeId, ResourceState>,
  /// Root outputs computed after the last successful apply.
  #[serde(default)]
  pub outputs: BTreeMap<String, Value>,
}

impl StateSnapshot {
  pub fn new() -> Self {
    Self {
      version: STATE_FORMAT_VERSION,
      lineage: uuid::Uuid::new_v4().to_string(),
      serial: 0,
      resources: BTreeMap::new(),
      outputs: BTreeMap::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }

  pub fn get(&self, id: &str) -> Option<&ResourceState> {
    self.resources.get(id)
  }

  pub fn record(&mut self, id: NodeId, resource: ResourceState) {
    self.resources.insert(id, resource);
  }

  pub fn remove(&mut self, id: &str) -> Option<ResourceState> {
    self.resources.remove(id)
  }

  pub fn version_info(&self) -> StateVersion {
    StateVersion {
      lineage: Some(self.lineage.clone()),
      serial: self.serial,
    }
  }
}

/// Recorded outputs, the values dependents are resolved against while
/// applying.
impl OutputLookup for StateSnapshot {
  fn lookup(&self, reference: &Reference) -> Option<Value> {
    self.get(reference.node.as_str())?.outputs.get(&reference.output).cloned()
  }
}

impl Default for StateSnapshot {
  fn default() -> Self {
    Self::new()
  }
}

/// A realized resource, recorded once its operation completes. A create
/// whose resource never became ready is recorded as soon as the provider
/// returns its identifier, marked [`tainted`](Self::tainted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
  pub kind: ResourceKind,
  /// Provider-side identifier, e.g. an ARM resource id.
  pub remote_id: String,
  /// Fully resolved inputs, sensitive values tagged.
  pub inputs: BTreeMap<String, Value>,
  /// Realized outputs, sensitive values tagged.
  pub outputs: BTreeMap<String, Value>,
  #[serde(default)]
  pub dependencies: BTreeSet<NodeId>,
  pub created_at: u64,
  pub updated_at: u64,
  /// The resource exists but did not finish provisioning. The next apply
  /// replaces it.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub tainted: bool,
}

/// Identifies one revision of a snapshot. Saved plans record it so a plan
/// computed against an older state is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
  /// `None` when no snapshot existed yet.
  pub lineage: Option<String>,
  pub serial: u64,
}

impl StateVersion {
  pub fn of(snapshot: Option<&StateSnapshot>) -> Self {
    match snapshot {
      Some(state) => state.version_info(),
      None => StateVersion {
        lineage: None,
        serial: 0,
      },
    }
  }
}

impl fmt::Display for StateVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.lineage {
      Some(lineage) => write!(f, "{lineage}#{}", self.serial),
      None => write!(f, "(no state)"),
    }
  }
}
