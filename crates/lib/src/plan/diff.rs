//! Diffing the resource graph against the state snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, info};

use super::{AttributeChange, ChangeAction, ChangeReason, Plan, PlanError, PlannedChange, StateDrift};
use crate::graph::{ExecutionDag, ResourceGraph};
use crate::resource::{ChangePolicy, NodeId, ResourceKind};
use crate::state::{StateSnapshot, StateVersion};
use crate::value::{OutputLookup, Reference, Value};

/// Outputs as they will be once the plan is applied, `Unknown` where the
/// provider has yet to produce them.
struct PlannedOutputs<'a> {
  outputs: &'a HashMap<NodeId, BTreeMap<String, Value>>,
}

impl OutputLookup for PlannedOutputs<'_> {
  fn lookup(&self, reference: &Reference) -> Option<Value> {
    self
      .outputs
      .get(&reference.node)
      .and_then(|outputs| outputs.get(&reference.output))
      .cloned()
  }
}

/// Compute the plan for `graph` against the `current` snapshot.
///
/// `drift` comes from a refresh: deleted resources are planned as creates,
/// and modified attributes are compared using their live values.
pub fn compute_plan(
  graph: &ResourceGraph,
  dag: &ExecutionDag,
  current: Option<&StateSnapshot>,
  drift: &[StateDrift],
) -> Result<Plan, PlanError> {
  let mut changes = Vec::new();

  if let Some(state) = current {
    changes.extend(plan_orphans(graph, state)?);
  }

  let deleted: HashSet<&NodeId> = drift
    .iter()
    .filter_map(|d| match d {
      StateDrift::Deleted { node } => Some(node),
      StateDrift::Modified { .. } => None,
    })
    .collect();
  let modified: HashMap<&NodeId, &Vec<(String, serde_json::Value)>> = drift
    .iter()
    .filter_map(|d| match d {
      StateDrift::Modified { node, attributes } => Some((node, attributes)),
      StateDrift::Deleted { .. } => None,
    })
    .collect();

  let mut planned: HashMap<NodeId, BTreeMap<String, Value>> = HashMap::new();

  for id in dag.order() {
    let Some(node) = graph.get(id.as_str()) else {
      continue;
    };
    let desired = node.resolve_inputs(&PlannedOutputs { outputs: &planned });
    let recorded = current.and_then(|state| state.get(id.as_str()));

    let (action, attributes, reason) = match recorded {
      None => (ChangeAction::Create, creation(node.kind, &desired), ChangeReason::New),
      Some(_) if deleted.contains(&id) => (ChangeAction::Create, creation(node.kind, &desired), ChangeReason::Deleted),
      Some(resource) if resource.tainted => {
        let (_, attributes) = classify(node.kind, &resource.inputs, &desired);
        (ChangeAction::Replace, attributes, ChangeReason::Tainted)
      }
      Some(resource) => {
        let mut baseline = resource.inputs.clone();
        if let Some(live) = modified.get(&id) {
          for (name, value) in live.iter() {
            baseline.insert(name.clone(), Value::from_json(value));
          }
        }
        let (action, attributes) = classify(node.kind, &baseline, &desired);
        let reason = if action.is_change() {
          ChangeReason::Changed
        } else {
          ChangeReason::Unchanged
        };
        (action, attributes, reason)
      }
    };

    let outputs = match (action, recorded) {
      (ChangeAction::Update, Some(resource)) => {
        let changed: Vec<&str> = attributes.iter().map(|a| a.name.as_str()).collect();
        resource
          .outputs
          .iter()
          .map(|(name, value)| {
            let affected = node.kind.output(name).is_some_and(|schema| schema.affected_by(&changed));
            let value = if affected {
              unknown_output(node.kind, name, &desired)
            } else {
              value.clone()
            };
            (name.clone(), value)
          })
          .collect()
      }
      (ChangeAction::NoOp, Some(resource)) => resource.outputs.clone(),
      _ => node
        .kind
        .schema()
        .outputs
        .iter()
        .map(|schema| (schema.name.to_string(), unknown_output(node.kind, schema.name, &desired)))
        .collect(),
    };
    planned.insert(id.clone(), outputs);

    let pending = !desired.values().all(Value::is_known);
    debug!(node = %id, %action, pending, "planned");
    changes.push(PlannedChange {
      id,
      kind: node.kind,
      action,
      attributes,
      reason,
      pending,
    });
  }

  let plan = Plan {
    changes,
    drift: drift.to_vec(),
    outputs: graph.resolve_outputs(&PlannedOutputs { outputs: &planned }),
    state_version: StateVersion::of(current),
  };
  info!(
    create = plan.count(ChangeAction::Create),
    update = plan.count(ChangeAction::Update),
    replace = plan.count(ChangeAction::Replace),
    delete = plan.count(ChangeAction::Delete),
    drift = plan.drift.len(),
    "plan computed"
  );
  Ok(plan)
}

/// Deletes for resources in state that the graph no longer declares, in
/// teardown order.
fn plan_orphans(graph: &ResourceGraph, state: &StateSnapshot) -> Result<Vec<PlannedChange>, PlanError> {
  let declared: BTreeSet<&NodeId> = graph.ids().collect();
  if state.resources.keys().all(|id| declared.contains(id)) {
    return Ok(Vec::new());
  }

  let state_dag = ExecutionDag::from_state(state)?;
  let mut deletes = Vec::new();
  for id in state_dag.reverse_order() {
    if declared.contains(&id) {
      continue;
    }
    let Some(resource) = state.get(id.as_str()) else {
      continue;
    };
    let attributes = resource
      .inputs
      .iter()
      .map(|(name, value)| AttributeChange::new(resource.kind, name, Some(value.clone()), None))
      .collect();
    deletes.push(PlannedChange {
      id,
      kind: resource.kind,
      action: ChangeAction::Delete,
      attributes,
      reason: ChangeReason::Orphaned,
      pending: false,
    });
  }
  Ok(deletes)
}

fn creation(kind: ResourceKind, desired: &BTreeMap<String, Value>) -> Vec<AttributeChange> {
  desired
    .iter()
    .map(|(name, value)| AttributeChange::new(kind, name, None, Some(value.clone())))
    .collect()
}

fn unknown_output(kind: ResourceKind, name: &str, inputs: &BTreeMap<String, Value>) -> Value {
  if kind.output_is_sensitive(name, inputs) {
    Value::sensitive(Value::Unknown)
  } else {
    Value::Unknown
  }
}

/// Compare recorded inputs with desired ones.
///
/// A desired value that is not yet known counts as changed, so a node
/// downstream of a create or replace is flagged for re-evaluation.
pub fn classify(
  kind: ResourceKind,
  baseline: &BTreeMap<String, Value>,
  desired: &BTreeMap<String, Value>,
) -> (ChangeAction, Vec<AttributeChange>) {
  let names: BTreeSet<&String> = baseline.keys().chain(desired.keys()).collect();
  let mut changes = Vec::new();

  for name in names {
    let old = baseline.get(name);
    let new = desired.get(name);
    let changed = match (old, new) {
      (Some(old), Some(new)) => !new.is_known() || old != new,
      _ => true,
    };
    if changed {
      changes.push(AttributeChange::new(kind, name, old.cloned(), new.cloned()));
    }
  }

  let action = if changes.is_empty() {
    ChangeAction::NoOp
  } else if changes.iter().any(|c| kind.policy(&c.name) == ChangePolicy::ForceReplace) {
    ChangeAction::Replace
  } else {
    ChangeAction::Update
  };
  (action, changes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::{build_graph, nodes};
  use crate::state::ResourceState;
  use crate::util::testutil::sample_config;

  fn inputs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
  }

  /// A snapshot as a successful apply of `graph` would leave it, with
  /// made-up outputs.
  fn applied_state(graph: &ResourceGraph) -> StateSnapshot {
    let dag = graph.validate().unwrap();
    let mut state = StateSnapshot::new();
    for id in dag.order() {
      let node = graph.get(id.as_str()).unwrap();
      let inputs = node.resolve_inputs(&state);
      let raw: BTreeMap<String, Value> = node
        .kind
        .schema()
        .outputs
        .iter()
        .map(|o| (o.name.to_string(), Value::from(format!("{id}-{}", o.name))))
        .collect();
      let outputs = node.kind.tag_outputs(&inputs, raw);
      state.record(
        id.clone(),
        ResourceState {
          kind: node.kind,
          remote_id: format!("/remote/{id}"),
          dependencies: node.dependencies(),
          inputs,
          outputs,
          created_at: 1,
          updated_at: 1,
          tainted: false,
        },
      );
    }
    state
  }

  fn plan(graph: &ResourceGraph, state: Option<&StateSnapshot>, drift: &[StateDrift]) -> Plan {
    let dag = graph.validate().unwrap();
    compute_plan(graph, &dag, state, drift).unwrap()
  }

  #[test]
  fn empty_state_creates_everything_in_order() {
    let graph = build_graph(&sample_config()).unwrap();
    let plan = plan(&graph, None, &[]);

    assert_eq!(plan.count(ChangeAction::Create), graph.len());
    assert_eq!(plan.changes[0].id.as_str(), nodes::RESOURCE_GROUP);
    assert_eq!(plan.outputs["app_url"], Value::Unknown);
    assert!(plan.outputs["database_connection_string"].is_sensitive());
    assert_eq!(plan.state_version, StateVersion::of(None));
  }

  #[test]
  fn applied_state_plans_no_operations() {
    let graph = build_graph(&sample_config()).unwrap();
    let state = applied_state(&graph);
    let plan = plan(&graph, Some(&state), &[]);

    assert!(!plan.has_changes(), "unexpected operations: {:?}", plan.operations().collect::<Vec<_>>());
    assert!(plan.changes.iter().all(|c| !c.pending));
  }

  #[test]
  fn replica_change_is_an_in_place_update() {
    let mut config = sample_config();
    let state = applied_state(&build_graph(&config).unwrap());
    config.max_replicas = 3;
    let plan = plan(&build_graph(&config).unwrap(), Some(&state), &[]);

    let app = plan.get(nodes::CONTAINER_APP).unwrap();
    assert_eq!(app.action, ChangeAction::Update);
    assert_eq!(app.attributes.len(), 1);
    assert_eq!(app.attributes[0].name, "max_replicas");
    assert_eq!(plan.operations().count(), 1);
  }

  #[test]
  fn location_change_replaces_and_cascades() {
    let mut config = sample_config();
    let state = applied_state(&build_graph(&config).unwrap());
    config.location = "northeurope".to_string();
    let plan = plan(&build_graph(&config).unwrap(), Some(&state), &[]);

    let rg = plan.get(nodes::RESOURCE_GROUP).unwrap();
    assert_eq!(rg.action, ChangeAction::Replace);
    assert_eq!(rg.replacing_attributes().collect::<Vec<_>>(), vec!["location"]);
    assert_eq!(plan.get(nodes::CONTAINER_REGISTRY).unwrap().action, ChangeAction::Replace);
  }

  #[test]
  fn deleted_registry_is_recreated_and_dependents_flagged() {
    let graph = build_graph(&sample_config()).unwrap();
    let state = applied_state(&graph);
    let drift = vec![StateDrift::Deleted {
      node: NodeId::from(nodes::CONTAINER_REGISTRY),
    }];
    let plan = plan(&graph, Some(&state), &drift);

    let registry = plan.get(nodes::CONTAINER_REGISTRY).unwrap();
    assert_eq!(registry.action, ChangeAction::Create);
    assert_eq!(registry.reason, ChangeReason::Deleted);

    let grant = plan.get(nodes::ACR_PULL).unwrap();
    assert_eq!(grant.action, ChangeAction::Replace);
    assert!(grant.pending);

    let app = plan.get(nodes::CONTAINER_APP).unwrap();
    assert_eq!(app.action, ChangeAction::Update);
    assert!(app.pending);

    assert_eq!(plan.get(nodes::POSTGRES_SERVER).unwrap().action, ChangeAction::NoOp);
    assert_eq!(plan.drift, drift);
  }

  #[test]
  fn tainted_registry_is_replaced_and_dependents_flagged() {
    let graph = build_graph(&sample_config()).unwrap();
    let mut state = applied_state(&graph);
    state.resources.get_mut(nodes::CONTAINER_REGISTRY).unwrap().tainted = true;
    let plan = plan(&graph, Some(&state), &[]);

    let registry = plan.get(nodes::CONTAINER_REGISTRY).unwrap();
    assert_eq!(registry.action, ChangeAction::Replace);
    assert_eq!(registry.reason, ChangeReason::Tainted);
    assert!(registry.attributes.is_empty());

    let grant = plan.get(nodes::ACR_PULL).unwrap();
    assert_eq!(grant.action, ChangeAction::Replace);
    assert!(grant.pending);
    assert_eq!(plan.get(nodes::POSTGRES_SERVER).unwrap().action, ChangeAction::NoOp);
  }

  #[test]
  fn deleted_tainted_resource_is_simply_created() {
    let graph = build_graph(&sample_config()).unwrap();
    let mut state = applied_state(&graph);
    state.resources.get_mut(nodes::CONTAINER_REGISTRY).unwrap().tainted = true;
    let drift = vec![StateDrift::Deleted {
      node: NodeId::from(nodes::CONTAINER_REGISTRY),
    }];
    let plan = plan(&graph, Some(&state), &drift);

    let registry = plan.get(nodes::CONTAINER_REGISTRY).unwrap();
    assert_eq!(registry.action, ChangeAction::Create);
    assert_eq!(registry.reason, ChangeReason::Deleted);
  }

  #[test]
  fn modified_attributes_are_compared_with_live_values() {
    let graph = build_graph(&sample_config()).unwrap();
    let state = applied_state(&graph);
    let drift = vec![StateDrift::Modified {
      node: NodeId::from(nodes::CONTAINER_REGISTRY),
      attributes: vec![("sku".to_string(), serde_json::json!("Premium"))],
    }];
    let plan = plan(&graph, Some(&state), &drift);

    let registry = plan.get(nodes::CONTAINER_REGISTRY).unwrap();
    assert_eq!(registry.action, ChangeAction::Update);
    assert_eq!(registry.attributes[0].old, Some(Value::from("Premium")));
    assert_eq!(registry.attributes[0].new, Some(Value::from("Basic")));
  }

  #[test]
  fn undeclared_resources_are_deleted_first() {
    let mut config = sample_config();
    let state = applied_state(&build_graph(&config).unwrap());
    config.pg_public_access = false;
    let plan = plan(&build_graph(&config).unwrap(), Some(&state), &[]);

    assert_eq!(plan.changes[0].id.as_str(), nodes::POSTGRES_FIREWALL_AZURE);
    assert_eq!(plan.changes[0].action, ChangeAction::Delete);
    assert_eq!(plan.changes[0].reason, ChangeReason::Orphaned);
  }

  #[test]
  fn sensitive_changes_are_flagged() {
    let kind = ResourceKind::PostgresFlexibleServer;
    let baseline = inputs(&[("administrator_password", Value::sensitive("old-password-123456"))]);
    let desired = inputs(&[("administrator_password", Value::sensitive("new-password-123456"))]);

    let (action, changes) = classify(kind, &baseline, &desired);
    assert_eq!(action, ChangeAction::Update);
    assert!(changes[0].sensitive);
    assert!(!format!("{changes:?}").contains("password-123456"));
  }

  #[test]
  fn unknown_values_count_as_changes() {
    let kind = ResourceKind::RoleAssignment;
    let baseline = inputs(&[("scope", Value::from("/acr"))]);
    let desired = inputs(&[("scope", Value::Unknown)]);
    let (action, _) = classify(kind, &baseline, &desired);
    assert_eq!(action, ChangeAction::Replace);
  }
}
