use std::time::Duration;

use infragraph_lib::execute::{ApplyError, ApplyOptions, PlanOptions, apply, plan};
use infragraph_lib::graph::nodes;
use infragraph_lib::plan::{ChangeAction, ChangeReason, PlanError, SavedPlan, StateDrift};
use infragraph_lib::resource::ResourceKind;
use infragraph_lib::state::{StateBackend, StateVersion};
use infragraph_lib::value::Value;

use super::common::{TestProject, apply_options, fitapp_graph};

fn plan_options() -> PlanOptions {
  PlanOptions {
    execute: apply_options().execute,
    ..PlanOptions::default()
  }
}

#[tokio::test]
async fn plan_without_state_creates_everything_and_writes_nothing() {
  let project = TestProject::new();
  let result = plan(&fitapp_graph(&[]), &project.backend, &project.providers, &plan_options())
    .await
    .unwrap();

  assert!(result.state.is_none());
  assert_eq!(result.plan.count(ChangeAction::Create), 11);
  assert_eq!(
    result.plan.state_version,
    StateVersion {
      lineage: None,
      serial: 0
    }
  );
  assert!(result.plan.outputs["app_url"].render().contains("known after apply"));
  assert!(result.plan.outputs["database_connection_string"].is_sensitive());

  assert!(project.provider.calls().is_empty());
  assert!(project.state().await.is_none());
}

#[tokio::test]
async fn plan_does_not_take_the_lock() {
  let project = TestProject::new();
  let held = project.backend.lock("apply", Duration::from_secs(60)).await.unwrap();

  let result = plan(&fitapp_graph(&[]), &project.backend, &project.providers, &plan_options()).await;

  assert!(result.is_ok());
  project.backend.unlock(&held).await.unwrap();
}

#[tokio::test]
async fn registry_deleted_out_of_band_is_recreated() {
  let project = TestProject::new();
  let graph = fitapp_graph(&[]);
  apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  project.delete_out_of_band(ResourceKind::ContainerRegistry, "acrfitappdev");

  let planned = plan(&graph, &project.backend, &project.providers, &plan_options())
    .await
    .unwrap()
    .plan;
  assert_eq!(
    planned.drift,
    vec![StateDrift::Deleted {
      node: nodes::CONTAINER_REGISTRY.into()
    }]
  );
  let registry = planned.get(nodes::CONTAINER_REGISTRY).unwrap();
  assert_eq!(registry.action, ChangeAction::Create);
  assert_eq!(registry.reason, ChangeReason::Deleted);

  let pull = planned.get(nodes::ACR_PULL).unwrap();
  assert_eq!(pull.action, ChangeAction::Replace);
  assert!(pull.pending);
  let app = planned.get(nodes::CONTAINER_APP).unwrap();
  assert_eq!(app.action, ChangeAction::Update);
  assert!(app.pending);
  assert_eq!(planned.get(nodes::RESOURCE_GROUP).unwrap().action, ChangeAction::NoOp);

  let result = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();
  assert!(result.is_success());
  assert_eq!(
    project.provider.calls_of("create").last().map(|id| id.as_str()),
    Some(nodes::CONTAINER_REGISTRY)
  );
  assert!(
    project
      .cloud
      .document(ResourceKind::ContainerRegistry, "acrfitappdev")
      .unwrap()
      .is_some()
  );

  let converged = plan(&graph, &project.backend, &project.providers, &plan_options())
    .await
    .unwrap()
    .plan;
  assert!(!converged.has_changes(), "{:?}", converged.operations().collect::<Vec<_>>());
}

#[tokio::test]
async fn sku_changed_out_of_band_is_reverted() {
  let project = TestProject::new();
  let graph = fitapp_graph(&[]);
  apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let path = project.cloud.document_path(ResourceKind::ContainerRegistry, "acrfitappdev");
  let mut document: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
  document["attributes"]["sku"] = serde_json::Value::from("Premium");
  std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

  let result = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let registry = result.plan.get(nodes::CONTAINER_REGISTRY).unwrap();
  assert_eq!(registry.action, ChangeAction::Update);
  assert_eq!(registry.attributes[0].name, "sku");
  assert_eq!(
    result.state.resources[nodes::CONTAINER_REGISTRY].inputs["sku"],
    Value::from("Basic")
  );
  let stored = project
    .cloud
    .document(ResourceKind::ContainerRegistry, "acrfitappdev")
    .unwrap()
    .unwrap();
  assert_eq!(stored.attributes["sku"], serde_json::Value::from("Basic"));
}

#[tokio::test]
async fn saved_plan_goes_stale_when_state_moves() {
  let project = TestProject::new();
  let graph = fitapp_graph(&[]);
  let planned = plan(&graph, &project.backend, &project.providers, &plan_options())
    .await
    .unwrap();

  let path = project.temp.path().join("fitapp.plan");
  SavedPlan::new(graph.clone(), planned.plan.state_version.clone())
    .unwrap()
    .write(&path)
    .unwrap();

  // Someone else applies in between.
  apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let saved = SavedPlan::read(&path).unwrap();
  let current = project.state().await;
  assert!(matches!(
    saved.check_current(current.as_ref()),
    Err(PlanError::Stale { .. })
  ));

  let options = ApplyOptions {
    expected_state: Some(saved.state.clone()),
    ..apply_options()
  };
  let err = apply(&saved.graph, &project.backend, &project.providers, &options)
    .await
    .unwrap_err();
  assert!(matches!(err, ApplyError::Plan(PlanError::Stale { .. })), "{err}");
  assert!(!project.backend.lock_path().exists());
}
