//! Applying plans and tearing resources down.
//!
//! This module provides the entry points that change the world:
//! - [`plan`] refreshes and diffs without touching state
//! - [`apply`] locks the state, re-plans and executes the changes
//! - [`destroy`] deletes every recorded resource
//!
//! Nodes run wave by wave. Within a wave independent nodes run concurrently,
//! bounded by [`ExecuteConfig::parallelism`]. The snapshot is persisted after
//! every completed operation, and a failure stops scheduling of later waves.
//! A created resource that is still provisioning is persisted as tainted
//! before the engine waits on it. Every write first renews the state lease.

mod apply;
mod destroy;
mod types;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::plan::ChangeAction;
use crate::provider::{
  Provider, ProviderError, ProvisioningState, Providers, ResourceRequest, RetryConfig, wait_until_ready, with_retry,
};
use crate::resource::NodeId;
use crate::state::{Lease, LockError, ResourceState, StateSnapshot};
use crate::util::unix_now;

pub use apply::{ApplyError, ApplyOptions, ApplyResult, PlanOptions, PlanResult, apply, apply_with, plan};
pub use destroy::{DestroyOptions, DestroyResult, destroy, destroy_with};
pub use types::{CancelFlag, ExecuteConfig, ExecuteError, ExecutionReport, NodeLifecycle, SkipReason};

/// One scheduled provider operation.
struct Step {
  id: NodeId,
  action: ChangeAction,
  request: ResourceRequest,
  /// What the snapshot holds for the node, if anything.
  recorded: Option<ResourceState>,
  dependencies: BTreeSet<NodeId>,
}

struct Outcome {
  id: NodeId,
  action: ChangeAction,
  /// `None` once the resource is gone.
  result: Result<Option<ResourceState>, ExecuteError>,
  /// The old resource was deleted before a replacement failed.
  removed: bool,
}

/// A resource that exists remotely but has not finished provisioning.
struct Tainted {
  id: NodeId,
  resource: ResourceState,
}

/// Runs waves of steps against the providers and keeps the snapshot current.
struct Executor<'a> {
  lease: &'a Lease<'a>,
  providers: &'a Providers,
  config: &'a ExecuteConfig,
  cancel: &'a CancelFlag,
}

impl Executor<'_> {
  /// Execute `waves` in order.
  ///
  /// `blockers` names the nodes that must succeed before a node may run.
  /// `prepare` turns a node into a step against the current snapshot, or
  /// `None` when there is nothing to do.
  async fn run<B, P>(
    &self,
    waves: Vec<Vec<NodeId>>,
    state: &mut StateSnapshot,
    report: &mut ExecutionReport,
    blockers: B,
    mut prepare: P,
  ) -> Result<(), LockError>
  where
    B: Fn(&str) -> Vec<NodeId>,
    P: FnMut(&NodeId, &StateSnapshot) -> Result<Option<Step>, ExecuteError>,
  {
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));

    'waves: for (index, wave) in waves.iter().enumerate() {
      if !report.failed.is_empty() {
        break;
      }
      debug!(wave = index, nodes = wave.len(), "executing wave");

      let mut join_set = JoinSet::new();
      let mut started = Vec::new();
      let (taint_tx, mut taint_rx) = unbounded_channel();

      for id in wave {
        if self.cancel.is_cancelled() {
          warn!(node = %id, "cancelled before scheduling");
          report.cancelled = true;
          break;
        }

        let step = match prepare(id, state) {
          Ok(Some(step)) => step,
          Ok(None) => {
            debug!(node = %id, "no changes");
            report.applied(id, None);
            continue;
          }
          Err(e) => {
            error!(node = %id, error = %e, "node failed");
            report.fail(e);
            continue;
          }
        };

        info!(node = %id, action = %step.action, "applying");
        report.transition(id, NodeLifecycle::Applying);
        started.push(id.clone());

        let provider = self.providers.for_kind(step.request.kind);
        let retry = self.config.retry.clone();
        let semaphore = semaphore.clone();
        let taint = taint_tx.clone();
        join_set.spawn(async move {
          let _permit = semaphore.acquire_owned().await;
          run_step(step, provider, retry, taint).await
        });
      }
      drop(taint_tx);

      collect(&mut join_set, &mut taint_rx, state, report, self.lease).await?;

      for id in started {
        if report.state_of(id.as_str()) == NodeLifecycle::Applying {
          report.fail(ExecuteError::Panicked { node: id });
        }
      }
      if report.cancelled {
        break 'waves;
      }
    }

    if report.cancelled || !report.failed.is_empty() {
      skip_unscheduled(&waves, report, &blockers);
    }
    Ok(())
  }
}

/// Drain `join_set`, recording and persisting each outcome as it completes.
async fn collect(
  join_set: &mut JoinSet<Outcome>,
  taint_rx: &mut UnboundedReceiver<Tainted>,
  state: &mut StateSnapshot,
  report: &mut ExecutionReport,
  lease: &Lease<'_>,
) -> Result<(), LockError> {
  let mut tainted = HashSet::new();

  loop {
    tokio::select! {
      Some(entry) = taint_rx.recv() => record_tainted(entry, state, lease, &mut tainted).await?,
      joined = join_set.join_next() => {
        let Some(joined) = joined else {
          break;
        };
        // A step reports its taint before it finishes.
        while let Ok(entry) = taint_rx.try_recv() {
          record_tainted(entry, state, lease, &mut tainted).await?;
        }
        let outcome = match joined {
          Ok(outcome) => outcome,
          Err(e) => {
            error!(error = %e, "node task panicked");
            continue;
          }
        };
        record_outcome(outcome, state, report, lease, &tainted).await?;
      }
    }
  }

  while let Ok(entry) = taint_rx.try_recv() {
    record_tainted(entry, state, lease, &mut tainted).await?;
  }
  Ok(())
}

async fn record_tainted(
  entry: Tainted,
  state: &mut StateSnapshot,
  lease: &Lease<'_>,
  tainted: &mut HashSet<NodeId>,
) -> Result<(), LockError> {
  let Tainted { id, resource } = entry;
  info!(node = %id, remote_id = %resource.remote_id, "created, waiting for provisioning");
  state.record(id.clone(), resource);
  persist(lease, state).await?;
  tainted.insert(id);
  Ok(())
}

async fn record_outcome(
  outcome: Outcome,
  state: &mut StateSnapshot,
  report: &mut ExecutionReport,
  lease: &Lease<'_>,
  tainted: &HashSet<NodeId>,
) -> Result<(), LockError> {
  match outcome.result {
    Ok(Some(resource)) => {
      info!(node = %outcome.id, action = %outcome.action, remote_id = %resource.remote_id, "applied");
      state.record(outcome.id.clone(), resource);
      persist(lease, state).await?;
      report.applied(&outcome.id, Some(outcome.action));
    }
    Ok(None) => {
      info!(node = %outcome.id, "deleted");
      state.remove(outcome.id.as_str());
      persist(lease, state).await?;
      report.applied(&outcome.id, Some(outcome.action));
    }
    Err(e) => {
      error!(node = %outcome.id, action = %outcome.action, error = %e, "node failed");
      if tainted.contains(&outcome.id) {
        warn!(node = %outcome.id, "recorded as tainted, the next apply replaces it");
      } else if outcome.removed {
        state.remove(outcome.id.as_str());
        persist(lease, state).await?;
      }
      report.fail(e);
    }
  }
  Ok(())
}

/// Mark every node that never ran as skipped, naming the failed node a
/// dependent was waiting on.
fn skip_unscheduled<B>(waves: &[Vec<NodeId>], report: &mut ExecutionReport, blockers: &B)
where
  B: Fn(&str) -> Vec<NodeId>,
{
  let mut blocked: HashMap<NodeId, NodeId> = report.failed.iter().map(|e| (e.node().clone(), e.node().clone())).collect();

  for id in waves.iter().flatten() {
    if report.state_of(id.as_str()) != NodeLifecycle::Pending {
      continue;
    }
    let cause = blockers(id.as_str())
      .iter()
      .find_map(|dependency| blocked.get(dependency).cloned());
    let reason = match cause {
      Some(failed) => {
        blocked.insert(id.clone(), failed.clone());
        SkipReason::DependencyFailed(failed)
      }
      None if report.cancelled => SkipReason::Cancelled,
      None => SkipReason::Halted,
    };
    warn!(node = %id, reason = %reason, "skipping node");
    report.skip(id, reason);
  }
}

/// Confirm the lease, bump the serial and write the snapshot.
async fn persist(lease: &Lease<'_>, state: &mut StateSnapshot) -> Result<(), LockError> {
  lease.renew().await?;
  state.serial += 1;
  lease.backend().save(state).await?;
  Ok(())
}

async fn run_step(step: Step, provider: Arc<dyn Provider>, retry: RetryConfig, taint: UnboundedSender<Tainted>) -> Outcome {
  let Step {
    id,
    action,
    request,
    recorded,
    dependencies,
  } = step;
  let provider = provider.as_ref();
  let mut removed = false;

  let result = match (action, recorded.as_ref()) {
    (ChangeAction::Delete, Some(current)) => delete(provider, &id, current, &retry).await.map(|()| None),
    (ChangeAction::Delete, None) => Ok(None),
    (ChangeAction::Update, Some(current)) => update(provider, &request, current, &dependencies, &retry)
      .await
      .map(Some),
    (ChangeAction::Replace, Some(current)) => match delete(provider, &id, current, &retry).await {
      Ok(()) => {
        removed = true;
        create(provider, &request, &dependencies, &retry, &taint).await.map(Some)
      }
      Err(e) => Err(e),
    },
    _ => create(provider, &request, &dependencies, &retry, &taint).await.map(Some),
  };

  Outcome {
    result: result.map_err(|source| ExecuteError::Provider {
      node: id.clone(),
      action,
      source,
    }),
    id,
    action,
    removed,
  }
}

async fn create(
  provider: &dyn Provider,
  request: &ResourceRequest,
  dependencies: &BTreeSet<NodeId>,
  retry: &RetryConfig,
  taint: &UnboundedSender<Tainted>,
) -> Result<ResourceState, ProviderError> {
  let operation = format!("create {}", request.id);
  let remote = with_retry(retry, &operation, || provider.create(request)).await?;

  let now = unix_now();
  let mut resource = ResourceState {
    kind: request.kind,
    remote_id: remote.remote_id,
    outputs: request.kind.tag_outputs(&request.inputs, remote.outputs),
    inputs: request.inputs.clone(),
    dependencies: dependencies.clone(),
    created_at: now,
    updated_at: now,
    tainted: true,
  };
  if remote.state != ProvisioningState::Succeeded {
    // A closed channel means the run has already stopped.
    let _ = taint.send(Tainted {
      id: request.id.clone(),
      resource: resource.clone(),
    });
  }

  wait_until_ready(provider, request.kind, &resource.remote_id, remote.state, retry).await?;
  resource.tainted = false;
  Ok(resource)
}

async fn update(
  provider: &dyn Provider,
  request: &ResourceRequest,
  current: &ResourceState,
  dependencies: &BTreeSet<NodeId>,
  retry: &RetryConfig,
) -> Result<ResourceState, ProviderError> {
  let operation = format!("update {}", request.id);
  let remote = with_retry(retry, &operation, || provider.update(request, current)).await?;
  wait_until_ready(provider, request.kind, &remote.remote_id, remote.state, retry).await?;

  Ok(ResourceState {
    kind: request.kind,
    remote_id: remote.remote_id,
    outputs: request.kind.tag_outputs(&request.inputs, remote.outputs),
    inputs: request.inputs.clone(),
    dependencies: dependencies.clone(),
    created_at: current.created_at,
    updated_at: unix_now(),
    tainted: false,
  })
}

async fn delete(provider: &dyn Provider, id: &NodeId, current: &ResourceState, retry: &RetryConfig) -> Result<(), ProviderError> {
  let operation = format!("delete {id}");
  with_retry(retry, &operation, || provider.delete(id, current)).await
}
