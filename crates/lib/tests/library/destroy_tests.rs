use infragraph_lib::execute::{DestroyOptions, apply, destroy, destroy_with};
use infragraph_lib::graph::nodes;
use infragraph_lib::plan::ChangeAction;
use infragraph_lib::resource::ResourceKind;

use super::common::{TestProject, apply_options, destroy_options, fitapp_graph};

async fn applied_project() -> TestProject {
  let project = TestProject::new();
  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();
  assert!(result.is_success());
  project
}

fn position(order: &[&str], id: &str) -> usize {
  order.iter().position(|candidate| *candidate == id).unwrap()
}

#[tokio::test]
async fn destroy_removes_dependents_first() {
  let project = applied_project().await;

  let result = destroy(&project.backend, &project.providers, &destroy_options())
    .await
    .unwrap();

  assert!(result.is_success());
  assert_eq!(result.report.as_ref().unwrap().count(ChangeAction::Delete), 11);

  let deletes = project.provider.calls_of("delete");
  let order: Vec<&str> = deletes.iter().map(|id| id.as_str()).collect();
  assert_eq!(order.first(), Some(&nodes::CONTAINER_APP));
  assert_eq!(order.last(), Some(&nodes::RESOURCE_GROUP));
  assert!(position(&order, nodes::CONTAINER_APP) < position(&order, nodes::CONTAINER_APP_ENVIRONMENT));
  assert!(position(&order, nodes::POSTGRES_DATABASE) < position(&order, nodes::POSTGRES_SERVER));
  assert!(position(&order, nodes::ACR_PULL) < position(&order, nodes::CONTAINER_REGISTRY));

  let state = project.state().await.unwrap();
  assert!(state.is_empty());
  assert!(state.outputs.is_empty());
  assert!(
    project
      .cloud
      .document(ResourceKind::ResourceGroup, "rg-fitapp-dev")
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn dry_run_lists_deletes_without_running_them() {
  let project = applied_project().await;
  let options = DestroyOptions {
    dry_run: true,
    ..destroy_options()
  };

  let result = destroy(&project.backend, &project.providers, &options).await.unwrap();

  assert!(result.report.is_none());
  assert_eq!(result.plan.count(ChangeAction::Delete), 11);
  assert_eq!(result.plan.changes[0].id.as_str(), nodes::CONTAINER_APP);
  assert!(project.provider.calls_of("delete").is_empty());
  assert_eq!(project.state().await.unwrap().resources.len(), 11);
}

#[tokio::test]
async fn declined_destroy_keeps_everything() {
  let project = applied_project().await;

  let result = destroy_with(&project.backend, &project.providers, &destroy_options(), |_| false)
    .await
    .unwrap();

  assert!(result.declined);
  assert!(project.provider.calls_of("delete").is_empty());
  assert!(!project.backend.lock_path().exists());
}

#[tokio::test]
async fn destroy_without_state_does_nothing() {
  let project = TestProject::new();

  let result = destroy(&project.backend, &project.providers, &destroy_options())
    .await
    .unwrap();

  assert!(result.state.is_none());
  assert!(!result.plan.has_changes());
  assert!(project.provider.calls().is_empty());
}
