//! Static checks run before anything is planned.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use super::{ExecutionDag, GraphError, ResourceGraph};
use crate::config::ValidationError;
use crate::consts::PULL_ONLY_ROLES;
use crate::resource::{ANY_ATTRIBUTE, NodeId, ResourceKind};
use crate::value::{Reference, Value};

impl ResourceGraph {
  /// Check the graph and return its execution order.
  ///
  /// Every problem of a category is reported at once. Reference problems are
  /// checked first, then cycles, then sensitivity and least privilege.
  pub fn validate(&self) -> Result<ExecutionDag, GraphError> {
    let problems = self.check_references();
    if !problems.is_empty() {
      return Err(ValidationError::from_problems(problems).into());
    }

    let dag = ExecutionDag::from_graph(self)?;

    let mut problems = self.check_sensitivity(&dag);
    problems.extend(self.check_least_privilege());
    if !problems.is_empty() {
      return Err(ValidationError::from_problems(problems).into());
    }

    debug!(nodes = self.len(), "resource graph validated");
    Ok(dag)
  }

  fn check_references(&self) -> Vec<ValidationError> {
    let mut problems = Vec::new();
    let mut seen = HashSet::new();

    for node in &self.nodes {
      if !seen.insert(&node.id) {
        problems.push(ValidationError::DuplicateNode(node.id.clone()));
      }

      for attribute in node.inputs.keys() {
        if node.kind.attribute(attribute).is_none() {
          problems.push(ValidationError::UnknownAttribute {
            node: node.id.clone(),
            attribute: attribute.clone(),
          });
        }
      }

      for (attribute, reference) in node.references() {
        if reference.node == node.id {
          problems.push(ValidationError::SelfReference {
            node: node.id.clone(),
            attribute: attribute.to_string(),
          });
          continue;
        }
        match self.get(reference.node.as_str()) {
          None => problems.push(ValidationError::UnknownNode {
            node: node.id.clone(),
            attribute: attribute.to_string(),
            target: reference.node.clone(),
          }),
          Some(target) if target.kind.output(&reference.output).is_none() => {
            problems.push(ValidationError::UnknownOutput {
              node: node.id.clone(),
              attribute: attribute.to_string(),
              target: reference.node.clone(),
              output: reference.output.clone(),
            });
          }
          Some(_) => {}
        }
      }
    }

    for (name, output) in &self.outputs {
      for reference in output.value.references() {
        let declared = self
          .get(reference.node.as_str())
          .is_some_and(|target| target.kind.output(&reference.output).is_some());
        if !declared {
          problems.push(ValidationError::OutputReference {
            output: name.clone(),
            target: reference.node.clone(),
          });
        }
      }
    }

    problems
  }

  /// Propagate sensitivity along references and check that sensitive data
  /// only lands in attributes and outputs that are allowed to carry it.
  fn check_sensitivity(&self, dag: &ExecutionDag) -> Vec<ValidationError> {
    let mut sensitive: HashSet<Reference> = HashSet::new();
    let mut problems = Vec::new();

    for id in dag.order() {
      let Some(node) = self.get(id.as_str()) else {
        continue;
      };

      let sensitive_attributes: BTreeSet<&str> = node
        .inputs
        .iter()
        .filter(|(_, value)| carries_secret(value, &sensitive))
        .map(|(name, _)| name.as_str())
        .collect();

      for attribute in &sensitive_attributes {
        if !node.kind.accepts_sensitive(attribute) {
          problems.push(ValidationError::SensitiveExposure {
            node: node.id.clone(),
            attribute: attribute.to_string(),
          });
        }
      }

      for output in node.kind.schema().outputs {
        let derived = output
          .derived_from
          .iter()
          .any(|name| *name != ANY_ATTRIBUTE && sensitive_attributes.contains(name));
        if output.sensitive || derived {
          sensitive.insert(Reference::new(node.id.clone(), output.name));
        }
      }
    }

    for (name, output) in &self.outputs {
      if !output.sensitive && carries_secret(&output.value, &sensitive) {
        problems.push(ValidationError::SensitiveOutput(name.clone()));
      }
    }

    problems
  }

  /// Role grants must be pull-only and scoped to exactly one registry, and
  /// registries must not expose admin credentials.
  fn check_least_privilege(&self) -> Vec<ValidationError> {
    let mut problems = Vec::new();
    let violation = |node: &NodeId, reason: String| ValidationError::Privilege {
      node: node.clone(),
      reason,
    };

    for node in &self.nodes {
      match node.kind {
        ResourceKind::RoleAssignment => {
          match node.inputs.get("role_definition_name").and_then(Value::as_str) {
            Some(role) if PULL_ONLY_ROLES.contains(&role) => {}
            Some(role) => problems.push(violation(
              &node.id,
              format!("role '{role}' is not pull-only (allowed: {})", PULL_ONLY_ROLES.join(", ")),
            )),
            None => problems.push(violation(&node.id, "role_definition_name must be a literal role name".into())),
          }

          if !self.references_output(node.inputs.get("scope"), ResourceKind::ContainerRegistry, "id") {
            problems.push(violation(
              &node.id,
              "scope must be exactly the id of one container registry".into(),
            ));
          }
          if !self.references_output(
            node.inputs.get("principal_id"),
            ResourceKind::UserAssignedIdentity,
            "principal_id",
          ) {
            problems.push(violation(
              &node.id,
              "principal_id must be the principal of a managed identity".into(),
            ));
          }
        }
        ResourceKind::ContainerRegistry => {
          if node.inputs.get("admin_enabled").and_then(Value::as_bool) != Some(false) {
            problems.push(violation(&node.id, "registry admin credentials must be disabled".into()));
          }
        }
        _ => {}
      }
    }

    problems
  }

  /// True when `value` is a bare reference to `output` of a `kind` node.
  fn references_output(&self, value: Option<&Value>, kind: ResourceKind, output: &str) -> bool {
    match value {
      Some(Value::Ref(reference)) => {
        reference.output == output
          && self
            .get(reference.node.as_str())
            .is_some_and(|target| target.kind == kind)
      }
      _ => false,
    }
  }
}

fn carries_secret(value: &Value, sensitive: &HashSet<Reference>) -> bool {
  value.is_sensitive() || value.references().into_iter().any(|r| sensitive.contains(r))
}
