//! Implementation of the `infragraph output` command.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use infragraph_lib::value::Value;

use crate::cmd::context::{Project, runtime};
use crate::output::{OutputFormat, print_info, print_json};

#[derive(Serialize)]
struct OutputJson {
  value: serde_json::Value,
  sensitive: bool,
}

/// Print root outputs as `name = value`, sensitive ones redacted.
pub(crate) fn print_outputs(outputs: &BTreeMap<String, Value>) {
  if outputs.is_empty() {
    return;
  }
  println!();
  println!("{}", "Outputs:".if_supports_color(Stream::Stdout, |s| s.bold()));
  for (name, value) in outputs {
    println!("  {} = {}", name, value.render());
  }
}

/// Text for `--raw`: strings without quotes, sensitive values revealed.
fn raw(value: &Value) -> String {
  match value.reveal() {
    serde_json::Value::String(s) => s,
    other => other.to_string(),
  }
}

pub fn cmd_output(project: &Project, name: Option<&str>, reveal: bool, output: OutputFormat) -> Result<()> {
  let rt = runtime()?;
  let outputs = project
    .load_state(&rt)?
    .map(|state| state.outputs)
    .unwrap_or_default();

  let Some(name) = name else {
    if reveal {
      bail!("--raw needs an output name");
    }
    if output.is_json() {
      let all: BTreeMap<&String, OutputJson> = outputs
        .iter()
        .map(|(name, value)| {
          (
            name,
            OutputJson {
              value: value.redacted(),
              sensitive: value.is_sensitive(),
            },
          )
        })
        .collect();
      return print_json(&all);
    }
    if outputs.is_empty() {
      print_info("No outputs. Run 'infragraph apply' first.");
    }
    for (name, value) in &outputs {
      println!("{} = {}", name, value.render());
    }
    return Ok(());
  };

  let Some(value) = outputs.get(name) else {
    bail!("Output '{}' not found. Known outputs: {}", name, known(&outputs));
  };

  if reveal {
    println!("{}", raw(value));
  } else if output.is_json() {
    print_json(&OutputJson {
      value: value.redacted(),
      sensitive: value.is_sensitive(),
    })?;
  } else {
    println!("{}", value.render());
  }
  Ok(())
}

fn known(outputs: &BTreeMap<String, Value>) -> String {
  if outputs.is_empty() {
    return "none".to_string();
  }
  outputs.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}
