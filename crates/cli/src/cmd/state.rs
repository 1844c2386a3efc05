//! Read-only inspection of the state snapshot.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde::Serialize;

use infragraph_lib::state::ResourceState;
use infragraph_lib::value::Value;

use crate::cmd::context::{Project, runtime};
use crate::output::{OutputFormat, format_timestamp, print_info, print_json, print_stat, print_warning};

#[derive(Subcommand, Debug)]
pub enum StateCommand {
  /// List the resources recorded in the state
  List {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show one recorded resource, sensitive values redacted
  Show {
    /// Node ID of the resource, e.g. container_registry
    id: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Print the raw snapshot, including sensitive values
  Pull,
}

pub fn cmd_state(project: &Project, command: &StateCommand) -> Result<()> {
  match command {
    StateCommand::List { output } => cmd_list(project, *output),
    StateCommand::Show { id, output } => cmd_show(project, id, *output),
    StateCommand::Pull => cmd_pull(project),
  }
}

fn cmd_list(project: &Project, output: OutputFormat) -> Result<()> {
  let rt = runtime()?;
  let state = project.load_state(&rt)?;

  if output.is_json() {
    #[derive(Serialize)]
    struct ListOutput {
      lineage: Option<String>,
      serial: u64,
      resources: Vec<ListItem>,
    }

    #[derive(Serialize)]
    struct ListItem {
      id: String,
      kind: String,
      remote_id: String,
      dependencies: Vec<String>,
      updated_at: u64,
      tainted: bool,
    }

    let resources = state
      .as_ref()
      .map(|s| {
        s.resources
          .iter()
          .map(|(id, r)| ListItem {
            id: id.to_string(),
            kind: r.kind.to_string(),
            remote_id: r.remote_id.clone(),
            dependencies: r.dependencies.iter().map(ToString::to_string).collect(),
            updated_at: r.updated_at,
            tainted: r.tainted,
          })
          .collect()
      })
      .unwrap_or_default();

    return print_json(&ListOutput {
      lineage: state.as_ref().map(|s| s.lineage.clone()),
      serial: state.as_ref().map_or(0, |s| s.serial),
      resources,
    });
  }

  let Some(state) = state.filter(|s| !s.is_empty()) else {
    print_info("No resources in the state.");
    return Ok(());
  };

  let width = state.resources.keys().map(|id| id.as_str().len()).max().unwrap_or(0);
  for (id, resource) in &state.resources {
    let taint = if resource.tainted { " (tainted)" } else { "" };
    if project.verbose {
      println!("{:width$}  {}  {}{}", id.as_str(), resource.kind, resource.remote_id, taint);
    } else {
      println!("{}{}", id, taint);
    }
  }
  print_info(&format!(
    "{} resource(s), serial {}",
    state.resources.len(),
    state.serial
  ));
  Ok(())
}

fn redacted(values: &BTreeMap<String, Value>) -> BTreeMap<&String, serde_json::Value> {
  values.iter().map(|(name, value)| (name, value.redacted())).collect()
}

fn cmd_show(project: &Project, id: &str, output: OutputFormat) -> Result<()> {
  let rt = runtime()?;
  let state = project.load_state(&rt)?;
  let Some(resource) = state.as_ref().and_then(|s| s.get(id)) else {
    bail!("No resource '{}' in the state", id);
  };

  if output.is_json() {
    #[derive(Serialize)]
    struct ShowOutput<'a> {
      id: &'a str,
      kind: String,
      remote_id: &'a str,
      dependencies: Vec<String>,
      created_at: u64,
      updated_at: u64,
      tainted: bool,
      inputs: BTreeMap<&'a String, serde_json::Value>,
      outputs: BTreeMap<&'a String, serde_json::Value>,
    }

    return print_json(&ShowOutput {
      id,
      kind: resource.kind.to_string(),
      remote_id: &resource.remote_id,
      dependencies: resource.dependencies.iter().map(ToString::to_string).collect(),
      created_at: resource.created_at,
      updated_at: resource.updated_at,
      tainted: resource.tainted,
      inputs: redacted(&resource.inputs),
      outputs: redacted(&resource.outputs),
    });
  }

  print_resource(id, resource);
  Ok(())
}

fn print_resource(id: &str, resource: &ResourceState) {
  println!("# {} ({})", id, resource.kind);
  print_stat("Remote ID", &resource.remote_id);
  print_stat("Created", &format_timestamp(resource.created_at));
  print_stat("Updated", &format_timestamp(resource.updated_at));
  if resource.tainted {
    print_stat("Status", "tainted, replaced on the next apply");
  }
  if !resource.dependencies.is_empty() {
    let dependencies: Vec<&str> = resource.dependencies.iter().map(|d| d.as_str()).collect();
    print_stat("Depends on", &dependencies.join(", "));
  }

  println!();
  for (name, value) in &resource.inputs {
    println!("  {} = {}", name, value.render());
  }
  if !resource.outputs.is_empty() {
    println!();
    println!("  # outputs");
    for (name, value) in &resource.outputs {
      println!("  {} = {}", name, value.render());
    }
  }
}

fn cmd_pull(project: &Project) -> Result<()> {
  let rt = runtime()?;
  let Some(state) = project.load_state(&rt)? else {
    print_warning("No state has been written yet.");
    return Ok(());
  };
  let json = serde_json::to_string_pretty(&state).context("Failed to serialize state")?;
  println!("{}", json);
  Ok(())
}
