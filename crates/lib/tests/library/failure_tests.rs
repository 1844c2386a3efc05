use std::time::Duration;

use infragraph_lib::execute::{
  ApplyError, ApplyOptions, CancelFlag, ExecuteError, NodeLifecycle, PlanOptions, SkipReason, apply, plan,
};
use infragraph_lib::graph::nodes;
use infragraph_lib::plan::{ChangeAction, ChangeReason};
use infragraph_lib::provider::{ProviderError, ProvisioningState};
use infragraph_lib::resource::{NodeId, ResourceKind};
use infragraph_lib::state::{LockConfig, LockError, LockInfo, StateBackend};

use super::common::{TestProject, apply_options, fitapp_graph};

fn quota() -> ProviderError {
  ProviderError::Quota("flexible server cores exhausted in westeurope".to_string())
}

#[tokio::test]
async fn failed_server_halts_dependents_and_keeps_progress() {
  let project = TestProject::new();
  project
    .provider
    .fail_next("create", ResourceKind::PostgresFlexibleServer, quota());
  let graph = fitapp_graph(&[]);

  let result = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  assert!(!result.is_success());
  let report = result.report.as_ref().unwrap();
  assert_eq!(report.failed.len(), 1);
  assert!(matches!(
    &report.failed[0],
    ExecuteError::Provider {
      source: ProviderError::Quota(_),
      ..
    }
  ));
  assert_eq!(report.state_of(nodes::POSTGRES_SERVER), NodeLifecycle::Failed);

  for id in [
    nodes::RESOURCE_GROUP,
    nodes::DB_PASSWORD,
    nodes::LOG_ANALYTICS,
    nodes::CONTAINER_REGISTRY,
    nodes::MANAGED_IDENTITY,
  ] {
    assert_eq!(report.state_of(id), NodeLifecycle::Applied, "{id}");
    assert!(result.state.get(id).is_some(), "{id}");
  }

  let blocked = SkipReason::DependencyFailed(NodeId::from(nodes::POSTGRES_SERVER));
  for id in [nodes::POSTGRES_FIREWALL_AZURE, nodes::POSTGRES_DATABASE, nodes::CONTAINER_APP] {
    assert_eq!(report.skipped.get(id), Some(&blocked), "{id}");
  }
  for id in [nodes::ACR_PULL, nodes::CONTAINER_APP_ENVIRONMENT] {
    assert_eq!(report.skipped.get(id), Some(&SkipReason::Halted), "{id}");
  }

  let persisted = project.state().await.unwrap();
  assert_eq!(persisted.resources.len(), 5);
  assert!(!project.backend.lock_path().exists());

  let resumed = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();
  assert!(resumed.is_success());
  assert_eq!(resumed.report.as_ref().unwrap().count(ChangeAction::Create), 6);
  assert_eq!(resumed.state.resources.len(), 11);
}

#[tokio::test]
async fn transient_errors_are_retried() {
  let project = TestProject::new();
  for _ in 0..2 {
    project.provider.fail_next(
      "create",
      ResourceKind::ContainerRegistry,
      ProviderError::Transient("429 Too Many Requests".to_string()),
    );
  }

  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  assert!(result.is_success());
  let attempts = project
    .provider
    .calls_of("create")
    .into_iter()
    .filter(|id| id.as_str() == nodes::CONTAINER_REGISTRY)
    .count();
  assert_eq!(attempts, 3);
}

#[tokio::test]
async fn exhausted_retries_fail_the_node() {
  let project = TestProject::new();
  for _ in 0..3 {
    project.provider.fail_next(
      "create",
      ResourceKind::UserAssignedIdentity,
      ProviderError::Timeout("no response within 30s".to_string()),
    );
  }

  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let report = result.report.as_ref().unwrap();
  match &report.failed[..] {
    [ExecuteError::Provider { node, source, .. }] => {
      assert_eq!(node.as_str(), nodes::MANAGED_IDENTITY);
      assert!(matches!(source, ProviderError::RetriesExhausted { attempts: 3, .. }), "{source}");
    }
    other => panic!("unexpected failures: {other:?}"),
  }
  assert_eq!(
    report.skipped.get(nodes::ACR_PULL),
    Some(&SkipReason::DependencyFailed(NodeId::from(nodes::MANAGED_IDENTITY)))
  );
}

#[tokio::test]
async fn held_lock_blocks_apply_without_touching_resources() {
  let project = TestProject::new();
  let held = project.backend.lock("apply", Duration::from_secs(600)).await.unwrap();

  let err = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap_err();

  match err {
    ApplyError::Lock(LockError::Contention { info, .. }) => assert_eq!(info.id, held.id),
    other => panic!("expected lock contention, got {other}"),
  }
  assert!(project.provider.calls().is_empty());
  assert!(project.state().await.is_none());

  project.backend.force_unlock(&held.id).await.unwrap();
  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options()).await;
  assert!(result.unwrap().is_success());
}

#[tokio::test]
async fn cancellation_stops_after_the_running_wave() {
  let project = TestProject::new();
  let cancel = CancelFlag::new();
  project
    .provider
    .cancel_after_create(ResourceKind::ResourceGroup, cancel.clone());
  let options = ApplyOptions {
    cancel,
    ..apply_options()
  };

  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &options)
    .await
    .unwrap();

  assert!(!result.is_success());
  let report = result.report.as_ref().unwrap();
  assert!(report.cancelled);
  assert_eq!(report.state_of(nodes::RESOURCE_GROUP), NodeLifecycle::Applied);
  assert_eq!(report.skipped.get(nodes::CONTAINER_APP), Some(&SkipReason::Cancelled));
  assert_eq!(
    project.provider.calls_of("create"),
    vec![NodeId::from(nodes::RESOURCE_GROUP)]
  );

  let persisted = project.state().await.unwrap();
  assert!(persisted.get(nodes::RESOURCE_GROUP).is_some());
  assert!(persisted.get(nodes::LOG_ANALYTICS).is_none());
  assert!(!project.backend.lock_path().exists());
}

#[tokio::test]
async fn provisioning_resources_are_polled_until_ready() {
  let project = TestProject::new();
  project.provider.provision_with(
    ResourceKind::ContainerRegistry,
    [ProvisioningState::Provisioning, ProvisioningState::Succeeded],
  );

  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  assert!(result.is_success());
  let registry = result.state.get(nodes::CONTAINER_REGISTRY).unwrap();
  assert!(!registry.tainted);
  assert!(project.state().await.unwrap().resources.values().all(|r| !r.tainted));
}

#[tokio::test]
async fn failed_provisioning_is_recorded_as_tainted_and_replaced() {
  let project = TestProject::new();
  project.provider.provision_with(
    ResourceKind::ContainerRegistry,
    [ProvisioningState::Provisioning, ProvisioningState::Failed],
  );
  let graph = fitapp_graph(&[]);

  let result = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let report = result.report.as_ref().unwrap();
  match &report.failed[..] {
    [ExecuteError::Provider { node, source, .. }] => {
      assert_eq!(node.as_str(), nodes::CONTAINER_REGISTRY);
      assert!(matches!(source, ProviderError::ProvisioningFailed(_)), "{source}");
    }
    other => panic!("unexpected failures: {other:?}"),
  }
  assert_eq!(
    report.skipped.get(nodes::ACR_PULL),
    Some(&SkipReason::DependencyFailed(NodeId::from(nodes::CONTAINER_REGISTRY)))
  );

  let persisted = project.state().await.unwrap();
  let registry = persisted.get(nodes::CONTAINER_REGISTRY).unwrap();
  assert!(registry.tainted);
  let document = project
    .cloud
    .document(ResourceKind::ContainerRegistry, "acrfitappdev")
    .unwrap()
    .unwrap();
  assert_eq!(document.remote_id, registry.remote_id);

  let options = PlanOptions {
    execute: apply_options().execute,
    ..PlanOptions::default()
  };
  let planned = plan(&graph, &project.backend, &project.providers, &options)
    .await
    .unwrap()
    .plan;
  let change = planned.get(nodes::CONTAINER_REGISTRY).unwrap();
  assert_eq!(change.action, ChangeAction::Replace);
  assert_eq!(change.reason, ChangeReason::Tainted);

  let resumed = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();
  assert!(resumed.is_success());
  assert_eq!(resumed.report.as_ref().unwrap().count(ChangeAction::Replace), 1);
  assert_eq!(
    project.provider.calls_of("delete"),
    vec![NodeId::from(nodes::CONTAINER_REGISTRY)]
  );
  assert_eq!(resumed.state.resources.len(), 11);
  assert!(resumed.state.resources.values().all(|r| !r.tainted));
}

#[tokio::test]
async fn long_operations_keep_the_lease_alive() {
  let project = TestProject::new();
  project
    .provider
    .slow_create(ResourceKind::ContainerRegistry, Duration::from_millis(3000));
  let options = ApplyOptions {
    lock: LockConfig { lease_secs: 2 },
    ..apply_options()
  };

  let graph = fitapp_graph(&[]);
  let (result, contender) = tokio::join!(
    apply(&graph, &project.backend, &project.providers, &options),
    async {
      tokio::time::sleep(Duration::from_millis(2500)).await;
      project.backend.lock("apply", Duration::from_secs(60)).await
    }
  );

  match contender {
    Err(LockError::Contention { info, .. }) => assert_eq!(info.operation, "apply"),
    other => panic!("expected lock contention, got {other:?}"),
  }
  assert!(result.unwrap().is_success());
  assert!(!project.backend.lock_path().exists());
}

#[tokio::test]
async fn lost_lease_stops_state_writes() {
  let project = TestProject::new();
  project
    .provider
    .slow_create(ResourceKind::ContainerRegistry, Duration::from_millis(1000));

  let graph = fitapp_graph(&[]);
  let options = apply_options();
  let (result, other) = tokio::join!(
    apply(&graph, &project.backend, &project.providers, &options),
    async {
      tokio::time::sleep(Duration::from_millis(300)).await;
      let held: LockInfo =
        serde_json::from_str(&std::fs::read_to_string(project.backend.lock_path()).unwrap()).unwrap();
      project.backend.force_unlock(&held.id).await.unwrap();
      project.backend.lock("destroy", Duration::from_secs(600)).await.unwrap()
    }
  );

  match result {
    Err(ApplyError::Lock(LockError::Lost { reason, .. })) => assert!(reason.contains("destroy"), "{reason}"),
    other => panic!("expected a lost lease, got {other:?}"),
  }
  let persisted = project.state().await.unwrap();
  assert!(persisted.get(nodes::RESOURCE_GROUP).is_some());
  assert!(persisted.get(nodes::CONTAINER_REGISTRY).is_none());

  let on_disk: LockInfo = serde_json::from_str(&std::fs::read_to_string(project.backend.lock_path()).unwrap()).unwrap();
  assert_eq!(on_disk, other);
}
