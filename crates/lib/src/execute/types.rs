//! Types for applying and destroying resources.
//!
//! This module defines the error types, the per-node lifecycle, the report
//! an execution produces and its configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::debug;

use crate::plan::ChangeAction;
use crate::provider::{ProviderError, RetryConfig};
use crate::resource::NodeId;

/// Errors that fail a single node.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// The provider call failed, after retries for transient errors.
  #[error("failed to {action} '{node}': {source}")]
  Provider {
    node: NodeId,
    action: ChangeAction,
    #[source]
    source: ProviderError,
  },

  /// An input still references an output no applied node has produced.
  #[error("'{node}' attribute '{attribute}' references an output that has not been realized")]
  Unresolved { node: NodeId, attribute: String },

  /// The task running the node panicked.
  #[error("'{node}' was interrupted unexpectedly")]
  Panicked { node: NodeId },
}

impl ExecuteError {
  pub fn node(&self) -> &NodeId {
    match self {
      ExecuteError::Provider { node, .. } | ExecuteError::Unresolved { node, .. } | ExecuteError::Panicked { node } => {
        node
      }
    }
  }
}

/// Where a node is in an execution.
///
/// `Pending → Applying → Applied | Failed`, or `Pending → Skipped`. A node is
/// recorded in state only once it reaches `Applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
  Pending,
  Applying,
  Applied,
  Failed,
  Skipped,
}

impl fmt::Display for NodeLifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      NodeLifecycle::Pending => "pending",
      NodeLifecycle::Applying => "applying",
      NodeLifecycle::Applied => "applied",
      NodeLifecycle::Failed => "failed",
      NodeLifecycle::Skipped => "skipped",
    };
    f.write_str(s)
  }
}

/// Why a node was never scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
  /// The node depends, directly or transitively, on a node that failed.
  DependencyFailed(NodeId),
  /// Execution was cancelled before the node was scheduled.
  Cancelled,
  /// Another node failed and scheduling stopped.
  Halted,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::DependencyFailed(node) => write!(f, "dependency '{node}' failed"),
      SkipReason::Cancelled => f.write_str("cancelled"),
      SkipReason::Halted => f.write_str("not started after an earlier failure"),
    }
  }
}

/// Outcome of an execution.
#[derive(Debug, Default)]
pub struct ExecutionReport {
  /// Final lifecycle state of every node that was considered.
  pub lifecycle: BTreeMap<NodeId, NodeLifecycle>,

  /// Completed provider operations, in completion order.
  pub operations: Vec<(NodeId, ChangeAction)>,

  /// Nodes that failed. Siblings running concurrently may fail together.
  pub failed: Vec<ExecuteError>,

  /// Nodes that were never scheduled.
  pub skipped: BTreeMap<NodeId, SkipReason>,

  /// Whether a cancellation request stopped scheduling.
  pub cancelled: bool,
}

impl ExecutionReport {
  /// Returns true if every node was applied.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
  }

  pub fn count(&self, action: ChangeAction) -> usize {
    self.operations.iter().filter(|(_, a)| *a == action).count()
  }

  pub fn state_of(&self, id: &str) -> NodeLifecycle {
    self.lifecycle.get(id).copied().unwrap_or(NodeLifecycle::Pending)
  }

  pub(crate) fn transition(&mut self, id: &NodeId, to: NodeLifecycle) {
    debug!(node = %id, from = %self.state_of(id.as_str()), to = %to, "node lifecycle");
    self.lifecycle.insert(id.clone(), to);
  }

  pub(crate) fn applied(&mut self, id: &NodeId, action: Option<ChangeAction>) {
    self.transition(id, NodeLifecycle::Applied);
    if let Some(action) = action {
      self.operations.push((id.clone(), action));
    }
  }

  pub(crate) fn fail(&mut self, error: ExecuteError) {
    self.transition(error.node(), NodeLifecycle::Failed);
    self.failed.push(error);
  }

  pub(crate) fn skip(&mut self, id: &NodeId, reason: SkipReason) {
    self.transition(id, NodeLifecycle::Skipped);
    self.skipped.insert(id.clone(), reason);
  }
}

/// Configuration for applying nodes.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of provider operations in flight at once.
  pub parallelism: usize,

  /// Retry and polling behaviour of provider calls.
  pub retry: RetryConfig,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: 4,
      retry: RetryConfig::default(),
    }
  }
}

/// Set once to stop scheduling further nodes. Operations already in flight
/// run to completion and are recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}
