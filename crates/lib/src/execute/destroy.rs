//! Tearing down every recorded resource.

use tracing::{debug, info, warn};

use super::{ApplyError, CancelFlag, ExecuteConfig, ExecutionReport, Executor, Step};
use crate::graph::{ExecutionDag, ResourceGraph};
use crate::plan::{ChangeAction, Plan, compute_plan};
use crate::provider::{Providers, ResourceRequest};
use crate::state::{Lease, LockConfig, StateBackend, StateSnapshot};

/// Options for the destroy operation.
#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
  /// Parallelism and retry behaviour.
  pub execute: ExecuteConfig,

  /// Lease duration of the state lock.
  pub lock: LockConfig,

  /// Stops scheduling when set.
  pub cancel: CancelFlag,

  /// Compute the teardown plan without deleting anything.
  pub dry_run: bool,
}

/// Result of a destroy operation.
#[derive(Debug)]
pub struct DestroyResult {
  /// Deletes in teardown order.
  pub plan: Plan,

  /// Execution details, `None` for a dry run, an empty state or a declined
  /// plan.
  pub report: Option<ExecutionReport>,

  /// The snapshot after the run, `None` when there was none.
  pub state: Option<StateSnapshot>,

  pub declined: bool,
}

impl DestroyResult {
  pub fn is_success(&self) -> bool {
    self.report.as_ref().is_none_or(ExecutionReport::is_success)
  }
}

/// Delete every resource in the snapshot without asking for confirmation.
pub async fn destroy(
  backend: &dyn StateBackend,
  providers: &Providers,
  options: &DestroyOptions,
) -> Result<DestroyResult, ApplyError> {
  destroy_with(backend, providers, options, |_| true).await
}

/// Delete every resource in the snapshot, dependents before their
/// dependencies, persisting after each deletion.
///
/// A dry run neither locks nor writes the state.
pub async fn destroy_with<F>(
  backend: &dyn StateBackend,
  providers: &Providers,
  options: &DestroyOptions,
  approve: F,
) -> Result<DestroyResult, ApplyError>
where
  F: FnOnce(&Plan) -> bool,
{
  info!(dry_run = options.dry_run, backend = %backend.describe(), "starting destroy");

  if options.dry_run {
    let current = backend.load().await?;
    let plan = teardown_plan(current.as_ref())?;
    return Ok(DestroyResult {
      plan,
      report: None,
      state: current,
      declined: false,
    });
  }

  let lease = Lease::acquire(backend, "destroy", options.lock.lease()).await?;
  let result = lease.hold(destroy_locked(&lease, providers, options, approve)).await;

  let id = lease.id();
  match lease.release().await {
    Ok(()) => debug!(lock = %id, "lock released"),
    Err(e) if result.is_ok() => return Err(e.into()),
    Err(e) => warn!(lock = %id, error = %e, "failed to release lock"),
  }
  result
}

async fn destroy_locked<F>(
  lease: &Lease<'_>,
  providers: &Providers,
  options: &DestroyOptions,
  approve: F,
) -> Result<DestroyResult, ApplyError>
where
  F: FnOnce(&Plan) -> bool,
{
  let Some(mut state) = lease.backend().load().await? else {
    info!("no state, nothing to destroy");
    return Ok(DestroyResult {
      plan: teardown_plan(None)?,
      report: None,
      state: None,
      declined: false,
    });
  };

  let plan = teardown_plan(Some(&state))?;
  if !plan.has_changes() {
    info!("state is empty, nothing to destroy");
    return Ok(DestroyResult {
      plan,
      report: None,
      state: Some(state),
      declined: false,
    });
  }
  if !approve(&plan) {
    info!("destroy declined");
    return Ok(DestroyResult {
      plan,
      report: None,
      state: Some(state),
      declined: true,
    });
  }

  let dag = ExecutionDag::from_state(&state)?;
  let mut waves = dag.waves();
  waves.reverse();

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
      |id| dag.dependents(id),
      |id, state| {
        Ok(state.get(id.as_str()).map(|resource| Step {
          id: id.clone(),
          action: ChangeAction::Delete,
          request: ResourceRequest {
            id: id.clone(),
            kind: resource.kind,
            inputs: resource.inputs.clone(),
          },
          recorded: Some(resource.clone()),
          dependencies: resource.dependencies.clone(),
        }))
      },
    )
    .await?;

  if report.is_success() && !state.outputs.is_empty() {
    state.outputs.clear();
    super::persist(lease, &mut state).await?;
  }

  info!(
    deleted = report.count(ChangeAction::Delete),
    failed = report.failed.len(),
    remaining = state.resources.len(),
    "destroy complete"
  );

  Ok(DestroyResult {
    plan,
    report: Some(report),
    state: Some(state),
    declined: false,
  })
}

/// Every recorded resource as a delete, in teardown order.
fn teardown_plan(state: Option<&StateSnapshot>) -> Result<Plan, ApplyError> {
  let empty = ResourceGraph::new();
  let dag = ExecutionDag::from_graph(&empty)?;
  Ok(compute_plan(&empty, &dag, state, &[])?)
}
