//! Plan and apply orchestration.
//!
//! [`apply`] runs the full flow:
//!
//! 1. Acquire the state lease
//! 2. Load the snapshot, refresh it and compute the plan
//! 3. Delete orphaned resources, then apply the graph wave by wave
//! 4. Record root outputs and release the lease
//!
//! The lease is renewed while the run is in progress and released on every
//! path once it has been acquired.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{CancelFlag, ExecuteConfig, ExecuteError, ExecutionReport, Executor, Step, persist};
use crate::graph::{ExecutionDag, GraphError, ResourceGraph};
use crate::plan::{ChangeAction, Plan, PlanError, StateDrift, classify, compute_plan, refresh};
use crate::provider::{Providers, ResourceRequest};
use crate::resource::NodeId;
use crate::state::{Lease, LockConfig, LockError, ResourceState, StateBackend, StateError, StateSnapshot, StateVersion};
use crate::value::Value;

/// Errors that abort a plan or apply before or around execution. Failures of
/// individual nodes are reported in the [`ExecutionReport`].
#[derive(Debug, Error)]
pub enum ApplyError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Lock(#[from] LockError),
}

/// Options for computing a plan without applying it.
#[derive(Debug, Clone)]
pub struct PlanOptions {
  /// Read every recorded resource from its provider first.
  pub refresh: bool,

  pub execute: ExecuteConfig,
}

impl Default for PlanOptions {
  fn default() -> Self {
    Self {
      refresh: true,
      execute: ExecuteConfig::default(),
    }
  }
}

#[derive(Debug)]
pub struct PlanResult {
  pub plan: Plan,

  /// The snapshot the plan was computed against.
  pub state: Option<StateSnapshot>,
}

/// Options for the apply operation.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
  /// Parallelism and retry behaviour.
  pub execute: ExecuteConfig,

  /// Refresh recorded resources before planning.
  pub refresh: bool,

  /// Lease duration of the state lock.
  pub lock: LockConfig,

  /// Stops scheduling when set, e.g. on Ctrl-C.
  pub cancel: CancelFlag,

  /// The state revision a saved plan was computed against. Apply refuses to
  /// run when the snapshot has changed since.
  pub expected_state: Option<StateVersion>,
}

impl Default for ApplyOptions {
  fn default() -> Self {
    Self {
      execute: ExecuteConfig::default(),
      refresh: true,
      lock: LockConfig::default(),
      cancel: CancelFlag::new(),
      expected_state: None,
    }
  }
}

/// Result of an apply operation.
#[derive(Debug)]
pub struct ApplyResult {
  /// The plan that was executed.
  pub plan: Plan,

  /// Execution details, `None` when nothing was executed because the plan
  /// had no changes or was declined.
  pub report: Option<ExecutionReport>,

  /// The snapshot after the run.
  pub state: StateSnapshot,

  /// The plan was shown and not approved.
  pub declined: bool,
}

impl ApplyResult {
  /// Returns true unless a node failed, was skipped or the run was cancelled.
  pub fn is_success(&self) -> bool {
    self.report.as_ref().is_none_or(ExecutionReport::is_success)
  }
}

/// Refresh the snapshot and compute the plan for `graph`. The state is
/// neither locked nor written.
pub async fn plan(
  graph: &ResourceGraph,
  backend: &dyn StateBackend,
  providers: &Providers,
  options: &PlanOptions,
) -> Result<PlanResult, ApplyError> {
  let dag = graph.validate()?;
  let current = backend.load().await?;
  let drift = match (&current, options.refresh) {
    (Some(state), true) => refresh(state, providers, &options.execute.retry).await?,
    _ => Vec::new(),
  };

  let plan = compute_plan(graph, &dag, current.as_ref(), &drift)?;
  Ok(PlanResult { plan, state: current })
}

/// Apply `graph` without asking for confirmation.
pub async fn apply(
  graph: &ResourceGraph,
  backend: &dyn StateBackend,
  providers: &Providers,
  options: &ApplyOptions,
) -> Result<ApplyResult, ApplyError> {
  apply_with(graph, backend, providers, options, |_| true).await
}

/// Apply `graph`, calling `approve` with the plan before anything changes.
///
/// `approve` runs while the lease is held, so the plan it sees is the plan
/// that gets executed.
pub async fn apply_with<F>(
  graph: &ResourceGraph,
  backend: &dyn StateBackend,
  providers: &Providers,
  options: &ApplyOptions,
  approve: F,
) -> Result<ApplyResult, ApplyError>
where
  F: FnOnce(&Plan) -> bool,
{
  let dag = graph.validate()?;
  info!(nodes = graph.len(), backend = %backend.describe(), "starting apply");

  let lease = Lease::acquire(backend, "apply", options.lock.lease()).await?;
  let result = lease.hold(apply_locked(graph, &dag, &lease, providers, options, approve)).await;

  let id = lease.id();
  match lease.release().await {
    Ok(()) => debug!(lock = %id, "lock released"),
    Err(e) if result.is_ok() => return Err(e.into()),
    Err(e) => warn!(lock = %id, error = %e, "failed to release lock"),
  }
  result
}

async fn apply_locked<F>(
  graph: &ResourceGraph,
  dag: &ExecutionDag,
  lease: &Lease<'_>,
  providers: &Providers,
  options: &ApplyOptions,
  approve: F,
) -> Result<ApplyResult, ApplyError>
where
  F: FnOnce(&Plan) -> bool,
{
  let current = lease.backend().load().await?;
  info!(has_current = current.is_some(), "loaded current state");

  if let Some(expected) = &options.expected_state {
    let actual = StateVersion::of(current.as_ref());
    if actual != *expected {
      return Err(
        PlanError::Stale {
          expected: expected.clone(),
          actual,
        }
        .into(),
      );
    }
  }

  let drift = match (&current, options.refresh) {
    (Some(state), true) => refresh(state, providers, &options.execute.retry).await?,
    _ => Vec::new(),
  };
  let plan = compute_plan(graph, dag, current.as_ref(), &drift)?;
  let mut state = current.unwrap_or_default();

  if !plan.has_changes() {
    info!("no changes to apply");
    record_outputs(graph, lease, &mut state).await?;
    return Ok(ApplyResult {
      plan,
      report: None,
      state,
      declined: false,
    });
  }

  if !approve(&plan) {
    info!("apply declined");
    return Ok(ApplyResult {
      plan,
      report: None,
      state,
      declined: true,
    });
  }

  let mut waves: Vec<Vec<NodeId>> = plan
    .changes
    .iter()
    .filter(|c| c.action == ChangeAction::Delete)
    .map(|c| vec![c.id.clone()])
    .collect();
  waves.extend(dag.waves());

  let executor = Executor {
    lease,
    providers,
    config: &options.execute,
    cancel: &options.cancel,
  };
  let mut report = ExecutionReport::default();
  executor
    .run(
      waves,
      &mut state,
      &mut report,
      |id| dag.dependencies(id),
      |id, state| prepare(graph, &plan, id, state),
    )
    .await?;

  if report.is_success() {
    record_outputs(graph, lease, &mut state).await?;
  }

  info!(
    operations = report.operations.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    cancelled = report.cancelled,
    serial = state.serial,
    "apply complete"
  );

  Ok(ApplyResult {
    plan,
    report: Some(report),
    state,
    declined: false,
  })
}

/// Decide what to do with `id` now that everything it depends on has been
/// applied.
///
/// Nodes the plan could only partially resolve are classified again against
/// their recorded inputs, so a dependent whose inputs turned out unchanged is
/// left alone. Tainted records are always replaced.
fn prepare(graph: &ResourceGraph, plan: &Plan, id: &NodeId, state: &StateSnapshot) -> Result<Option<Step>, ExecuteError> {
  let recorded = state.get(id.as_str()).cloned();

  let Some(node) = graph.get(id.as_str()) else {
    // Orphaned: in state but no longer declared.
    let Some(resource) = recorded else {
      return Ok(None);
    };
    return Ok(Some(Step {
      id: id.clone(),
      action: ChangeAction::Delete,
      request: ResourceRequest {
        id: id.clone(),
        kind: resource.kind,
        inputs: resource.inputs.clone(),
      },
      dependencies: resource.dependencies.clone(),
      recorded: Some(resource),
    }));
  };

  let inputs = node.resolve_inputs(state);
  if let Some((attribute, _)) = inputs.iter().find(|(_, value)| !value.is_known()) {
    return Err(ExecuteError::Unresolved {
      node: id.clone(),
      attribute: attribute.clone(),
    });
  }

  let planned = plan.get(id.as_str()).map(|c| c.action);
  let action = match &recorded {
    Some(_) if planned == Some(ChangeAction::Create) => ChangeAction::Create,
    Some(resource) if resource.tainted => ChangeAction::Replace,
    Some(resource) => classify(node.kind, &baseline(resource, &plan.drift, id), &inputs).0,
    None => ChangeAction::Create,
  };
  if planned != Some(action) {
    debug!(node = %id, ?planned, %action, "re-evaluated");
  }
  if action == ChangeAction::NoOp {
    return Ok(None);
  }

  Ok(Some(Step {
    id: id.clone(),
    action,
    request: ResourceRequest {
      id: id.clone(),
      kind: node.kind,
      inputs,
    },
    recorded,
    dependencies: node.dependencies(),
  }))
}

/// Recorded inputs with attributes changed outside of infragraph replaced by
/// their live values.
fn baseline(resource: &ResourceState, drift: &[StateDrift], id: &NodeId) -> BTreeMap<String, Value> {
  let mut inputs = resource.inputs.clone();
  for entry in drift {
    if let StateDrift::Modified { node, attributes } = entry
      && node == id
    {
      for (name, value) in attributes {
        inputs.insert(name.clone(), Value::from_json(value));
      }
    }
  }
  inputs
}

/// Resolve root outputs against the snapshot and persist them if they
/// changed.
async fn record_outputs(graph: &ResourceGraph, lease: &Lease<'_>, state: &mut StateSnapshot) -> Result<(), LockError> {
  let outputs = graph.resolve_outputs(&*state);
  if outputs != state.outputs {
    state.outputs = outputs;
    persist(lease, state).await?;
    debug!(outputs = state.outputs.len(), serial = state.serial, "outputs recorded");
  }
  Ok(())
}
