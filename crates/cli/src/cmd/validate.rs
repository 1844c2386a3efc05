//! Implementation of the `infragraph validate` command.
//!
//! Checks variables, the resource graph, sensitivity and least privilege
//! without reading state or calling the provider.

use anyhow::{Result, bail};
use serde::Serialize;

use crate::cmd::Project;
use crate::output::{OutputFormat, print_json, print_stat, print_success};

#[derive(Serialize)]
struct ValidateOutput {
  valid: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
  resources: usize,
  waves: Vec<Vec<String>>,
}

pub fn cmd_validate(project: &Project, output: OutputFormat) -> Result<()> {
  let checked = project.graph().and_then(|graph| {
    let dag = graph.validate()?;
    Ok((graph, dag))
  });

  let (graph, dag) = match checked {
    Ok(checked) => checked,
    Err(e) if output.is_json() => {
      print_json(&ValidateOutput {
        valid: false,
        error: Some(format!("{e:#}")),
        resources: 0,
        waves: Vec::new(),
      })?;
      bail!("validation failed");
    }
    Err(e) => return Err(e),
  };

  let waves: Vec<Vec<String>> = dag
    .waves()
    .into_iter()
    .map(|wave| wave.into_iter().map(|id| id.to_string()).collect())
    .collect();

  if output.is_json() {
    return print_json(&ValidateOutput {
      valid: true,
      error: None,
      resources: graph.len(),
      waves,
    });
  }

  print_success("The configuration is valid.");
  print_stat("Resources", &graph.len().to_string());
  print_stat("Outputs", &graph.outputs.len().to_string());
  if project.verbose {
    for (index, wave) in waves.iter().enumerate() {
      print_stat(&format!("Wave {}", index + 1), &wave.join(", "));
    }
  } else {
    print_stat("Waves", &waves.len().to_string());
  }

  Ok(())
}
