//! Plans written by `plan --out` and applied later.
//!
//! A saved plan carries the graph it was computed from and the state
//! revision it was computed against. Applying it re-validates the graph and
//! refuses to run when the state has moved on since.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PlanError;
use crate::graph::ResourceGraph;
use crate::state::{StateSnapshot, StateVersion};
use crate::util::fs::write_atomic;
use crate::util::hash::{Fingerprint, Hashable};
use crate::util::unix_now;

/// Current on-disk format of [`SavedPlan`].
pub const PLAN_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPlan {
  pub version: u32,
  pub created_at: u64,
  pub state: StateVersion,
  pub graph: ResourceGraph,
  /// SHA-256 over the version, state revision and graph.
  pub digest: Fingerprint,
}

#[derive(Serialize)]
struct Digested<'a> {
  version: u32,
  state: &'a StateVersion,
  graph: &'a ResourceGraph,
}

impl Hashable for Digested<'_> {}

impl SavedPlan {
  pub fn new(graph: ResourceGraph, state: StateVersion) -> Result<Self, PlanError> {
    let digest = digest(PLAN_FORMAT_VERSION, &state, &graph)?;
    Ok(Self {
      version: PLAN_FORMAT_VERSION,
      created_at: unix_now(),
      state,
      graph,
      digest,
    })
  }

  pub fn write(&self, path: &Path) -> Result<(), PlanError> {
    let content = serde_json::to_vec_pretty(self).map_err(PlanError::Serialize)?;
    write_atomic(path, &content).map_err(|source| PlanError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), digest = %self.digest.short(), "plan saved");
    Ok(())
  }

  /// Read a plan and check its format version and digest.
  pub fn read(path: &Path) -> Result<Self, PlanError> {
    let content = fs::read(path).map_err(|source| PlanError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let plan: SavedPlan = serde_json::from_slice(&content).map_err(|source| PlanError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    if plan.version != PLAN_FORMAT_VERSION {
      return Err(PlanError::UnsupportedVersion {
        found: plan.version,
        expected: PLAN_FORMAT_VERSION,
      });
    }
    if digest(plan.version, &plan.state, &plan.graph)? != plan.digest {
      return Err(PlanError::Corrupt {
        path: path.to_path_buf(),
      });
    }
    Ok(plan)
  }

  /// Fail with [`PlanError::Stale`] unless `current` is the revision the
  /// plan was computed against.
  pub fn check_current(&self, current: Option<&StateSnapshot>) -> Result<(), PlanError> {
    let actual = StateVersion::of(current);
    if actual != self.state {
      return Err(PlanError::Stale {
        expected: self.state.clone(),
        actual,
      });
    }
    Ok(())
  }
}

fn digest(version: u32, state: &StateVersion, graph: &ResourceGraph) -> Result<Fingerprint, PlanError> {
  Digested { version, state, graph }
    .fingerprint()
    .map_err(PlanError::Serialize)
}
