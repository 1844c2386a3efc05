//! Implementation of the `infragraph plan` command.
//!
//! Refreshes the recorded resources, diffs them against the configuration
//! and prints the result. Optionally saves the plan for `apply FILE`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use infragraph_lib::execute::{PlanOptions, plan};
use infragraph_lib::plan::{Plan, SavedPlan, StateDrift};

use crate::cmd::context::{Project, plan_path, runtime};
use crate::output::{OutputFormat, plan_summary, print_info, print_json, print_plan};

/// Exit status of `plan --detailed-exitcode` when there are changes.
const EXIT_CHANGES: i32 = 2;

#[derive(Serialize)]
pub(crate) struct PlanJson {
  changes: Vec<ChangeJson>,
  drift: Vec<StateDrift>,
  outputs: serde_json::Map<String, serde_json::Value>,
  lineage: Option<String>,
  serial: u64,
  summary: String,
}

#[derive(Serialize)]
struct ChangeJson {
  id: String,
  kind: String,
  action: String,
  reason: String,
  pending: bool,
  attributes: Vec<AttributeJson>,
}

#[derive(Serialize)]
struct AttributeJson {
  name: String,
  old: serde_json::Value,
  new: serde_json::Value,
  forces_replacement: bool,
  sensitive: bool,
}

impl PlanJson {
  /// A view of `plan` with sensitive values redacted.
  pub(crate) fn new(plan: &Plan) -> Self {
    let redacted = |value: &Option<infragraph_lib::value::Value>| {
      value
        .as_ref()
        .map(|v| v.redacted())
        .unwrap_or(serde_json::Value::Null)
    };

    Self {
      changes: plan
        .operations()
        .map(|change| ChangeJson {
          id: change.id.to_string(),
          kind: change.kind.to_string(),
          action: change.action.to_string(),
          reason: change.reason.to_string(),
          pending: change.pending,
          attributes: change
            .attributes
            .iter()
            .map(|a| AttributeJson {
              name: a.name.clone(),
              old: redacted(&a.old),
              new: redacted(&a.new),
              forces_replacement: a.forces_replacement,
              sensitive: a.sensitive,
            })
            .collect(),
        })
        .collect(),
      drift: plan.drift.clone(),
      outputs: plan
        .outputs
        .iter()
        .map(|(name, value)| (name.clone(), value.redacted()))
        .collect(),
      lineage: plan.state_version.lineage.clone(),
      serial: plan.state_version.serial,
      summary: plan_summary(plan),
    }
  }
}

pub fn cmd_plan(
  project: &Project,
  out: Option<&Path>,
  detailed_exitcode: bool,
  refresh: bool,
  output: OutputFormat,
) -> Result<()> {
  let graph = project.graph()?;
  let backend = project.backend()?;
  let providers = project.providers();
  let options = PlanOptions {
    refresh,
    execute: project.execute_config(None),
  };

  let rt = runtime()?;
  let result = rt
    .block_on(plan(&graph, backend.as_ref(), &providers, &options))
    .context("Plan failed")?;
  let has_changes = result.plan.has_changes();

  let saved = match out {
    Some(out) => {
      let path = plan_path(out);
      SavedPlan::new(graph, result.plan.state_version.clone())
        .and_then(|saved| saved.write(&path))
        .with_context(|| format!("Failed to save plan to {}", path.display()))?;
      info!(path = %path.display(), "plan saved");
      Some(path)
    }
    None => None,
  };

  if output.is_json() {
    print_json(&PlanJson::new(&result.plan))?;
  } else {
    print_plan(&result.plan, project.verbose);
    if let Some(path) = &saved {
      println!();
      print_info(&format!("Saved the plan to {}", path.display()));
      print_info(&format!("To perform exactly these actions, run: infragraph apply {}", path.display()));
    }
  }

  if detailed_exitcode && has_changes {
    std::process::exit(EXIT_CHANGES);
  }
  Ok(())
}
