use infragraph_lib::config::{ConfigValue, EnvironmentConfig, ValidationError};
use infragraph_lib::execute::{ApplyError, apply};
use infragraph_lib::graph::{GraphError, nodes};
use infragraph_lib::plan::ChangeAction;
use infragraph_lib::provider::ProvisioningState;
use infragraph_lib::resource::{NodeId, ResourceKind};
use infragraph_lib::value::{REDACTED, Value};

use super::common::{TestProject, apply_options, fitapp_graph, fitapp_values};

#[tokio::test]
async fn fresh_apply_creates_every_resource() {
  let project = TestProject::new();
  let graph = fitapp_graph(&[]);

  let result = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  assert!(result.is_success());
  let report = result.report.as_ref().unwrap();
  assert_eq!(report.count(ChangeAction::Create), 11);
  assert_eq!(result.state.resources.len(), 11);

  let outputs = &result.state.outputs;
  assert_eq!(
    outputs["registry_login_server"],
    Value::from("acrfitappdev.azurecr.io")
  );
  let url = outputs["app_url"].as_str().unwrap();
  assert!(url.starts_with("https://ca-fitapp-dev."), "{url}");
  assert!(url.ends_with(".westeurope.azurecontainerapps.io"), "{url}");

  let connection = &outputs["database_connection_string"];
  assert!(connection.is_sensitive());
  assert!(
    connection
      .plain()
      .as_str()
      .unwrap()
      .starts_with("postgresql://pgadmin:")
  );

  let registry = project
    .cloud
    .document(ResourceKind::ContainerRegistry, "acrfitappdev")
    .unwrap()
    .unwrap();
  assert_eq!(registry.provisioning_state, ProvisioningState::Succeeded);
  assert!(!project.backend.lock_path().exists());
}

#[tokio::test]
async fn second_apply_is_a_no_op() {
  let project = TestProject::new();
  let graph = fitapp_graph(&[]);
  let first = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let second = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  assert!(!second.plan.has_changes());
  assert!(second.report.is_none());
  assert_eq!(second.state.serial, first.state.serial);
  assert_eq!(project.provider.calls_of("create").len(), 10);
  assert!(project.provider.calls_of("update").is_empty());
}

#[test]
fn wrong_port_is_rejected_before_any_provider_call() {
  let values = fitapp_values(&[("app_port", ConfigValue::from(9000i64))]);
  let err = EnvironmentConfig::from_values(&values).unwrap_err();
  assert!(
    matches!(
      err,
      ValidationError::PortMismatch {
        configured: 9000,
        expected: 8030
      }
    ),
    "{err}"
  );
}

#[tokio::test]
async fn replica_change_updates_the_app_in_place() {
  let project = TestProject::new();
  apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();
  let before = project.state().await.unwrap();

  let graph = fitapp_graph(&[("max_replicas", ConfigValue::from(3i64))]);
  let result = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  assert_eq!(result.plan.operations().count(), 1);
  assert_eq!(result.plan.get(nodes::CONTAINER_APP).unwrap().action, ChangeAction::Update);
  assert_eq!(project.provider.calls_of("update"), vec![NodeId::from(nodes::CONTAINER_APP)]);

  let app = &result.state.resources[nodes::CONTAINER_APP];
  assert_eq!(app.inputs["max_replicas"], Value::from(3u32));
  assert_eq!(app.remote_id, before.resources[nodes::CONTAINER_APP].remote_id);
  assert_eq!(app.created_at, before.resources[nodes::CONTAINER_APP].created_at);
}

#[tokio::test]
async fn pull_role_is_scoped_to_the_registry() {
  let project = TestProject::new();
  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();
  let state = &result.state;

  let assignment = &state.resources[nodes::ACR_PULL];
  assert_eq!(assignment.inputs["role_definition_name"], Value::from("AcrPull"));
  assert_eq!(
    assignment.inputs["scope"],
    Value::from(state.resources[nodes::CONTAINER_REGISTRY].remote_id.as_str())
  );
  assert_eq!(
    assignment.inputs["principal_id"],
    state.resources[nodes::MANAGED_IDENTITY].outputs["principal_id"]
  );
}

#[tokio::test]
async fn broader_role_is_refused() {
  let project = TestProject::new();
  let mut graph = fitapp_graph(&[]);
  let assignment = graph
    .nodes
    .iter_mut()
    .find(|node| node.id.as_str() == nodes::ACR_PULL)
    .unwrap();
  assignment
    .inputs
    .insert("role_definition_name".to_string(), Value::from("Contributor"));

  let err = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap_err();

  assert!(
    matches!(
      err,
      ApplyError::Graph(GraphError::Invalid(ValidationError::Privilege { .. }))
    ),
    "{err}"
  );
  assert!(project.provider.calls().is_empty());
  assert!(project.state().await.is_none());
}

#[tokio::test]
async fn secrets_never_show_in_debug_output() {
  let project = TestProject::new();
  let result = apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let password = result.state.resources[nodes::DB_PASSWORD].outputs["result"]
    .plain()
    .as_str()
    .unwrap()
    .to_string();
  let debug = format!("{:?}", result.state);
  assert!(!debug.contains(&password));
  assert!(debug.contains(REDACTED));

  let rendered = result.state.outputs["database_connection_string"].render();
  assert_eq!(rendered, REDACTED);
}

#[tokio::test]
async fn dependency_cycle_is_rejected() {
  let project = TestProject::new();
  let mut graph = fitapp_graph(&[]);
  let group = graph
    .nodes
    .iter_mut()
    .find(|node| node.id.as_str() == nodes::RESOURCE_GROUP)
    .unwrap();
  group
    .inputs
    .insert("tags".to_string(), Value::reference(nodes::CONTAINER_APP, "id"));

  let err = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap_err();

  match err {
    ApplyError::Graph(GraphError::Cycle { members }) => {
      assert!(members.iter().any(|m| m.as_str() == nodes::RESOURCE_GROUP));
      assert!(members.iter().any(|m| m.as_str() == nodes::CONTAINER_APP));
    }
    other => panic!("expected a cycle, got {other}"),
  }
  assert!(project.provider.calls().is_empty());
}

#[tokio::test]
async fn public_access_off_removes_the_firewall_rule() {
  let project = TestProject::new();
  apply(&fitapp_graph(&[]), &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  let graph = fitapp_graph(&[("pg_public_access", ConfigValue::from(false))]);
  let result = apply(&graph, &project.backend, &project.providers, &apply_options())
    .await
    .unwrap();

  assert!(result.is_success());
  let first = &result.plan.changes[0];
  assert_eq!(first.id.as_str(), nodes::POSTGRES_FIREWALL_AZURE);
  assert_eq!(first.action, ChangeAction::Delete);
  assert_eq!(
    result.plan.get(nodes::POSTGRES_SERVER).unwrap().action,
    ChangeAction::Update
  );

  assert!(result.state.get(nodes::POSTGRES_FIREWALL_AZURE).is_none());
  assert!(
    project
      .cloud
      .document(ResourceKind::PostgresFirewallRule, "psql-fitapp-dev_AllowAzureServices")
      .unwrap()
      .is_none()
  );
}
