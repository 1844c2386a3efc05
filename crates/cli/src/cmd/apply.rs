//! Implementation of the `infragraph apply` command.
//!
//! Plans against the locked state, asks for confirmation and executes the
//! plan. With a saved plan file the confirmation is skipped, and the run is
//! refused if the state has moved since the plan was made.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use infragraph_lib::execute::{ApplyOptions, apply_with};
use infragraph_lib::plan::{ChangeAction, SavedPlan};

use crate::cmd::context::{Project, cancel_on_ctrl_c, plan_path, runtime};
use crate::cmd::output::print_outputs;
use crate::output::{format_duration, print_info, print_plan, print_report, print_success};
use crate::prompts::{confirm, ensure_interactive};

const APPROVE_FLAG: &str = "--auto-approve";

pub fn cmd_apply(
  project: &Project,
  plan_file: Option<&Path>,
  auto_approve: bool,
  parallelism: Option<usize>,
  refresh: bool,
) -> Result<()> {
  let (graph, expected_state, assume_yes) = match plan_file {
    Some(file) => {
      let path = plan_path(file);
      let saved = SavedPlan::read(&path).with_context(|| format!("Failed to read plan {}", path.display()))?;
      (saved.graph, Some(saved.state), true)
    }
    None => (project.graph()?, None, auto_approve),
  };
  if !assume_yes {
    ensure_interactive(APPROVE_FLAG)?;
  }

  let backend = project.backend()?;
  let providers = project.providers();
  let rt = runtime()?;
  let options = ApplyOptions {
    execute: project.execute_config(parallelism),
    refresh,
    lock: project.config.lock.clone(),
    cancel: cancel_on_ctrl_c(&rt),
    expected_state,
  };

  let verbose = project.verbose;
  let started = Instant::now();
  let mut prompt_error = None;
  let result = rt.block_on(apply_with(&graph, backend.as_ref(), &providers, &options, |plan| {
    print_plan(plan, verbose);
    println!();
    match confirm("Apply these changes?", assume_yes, APPROVE_FLAG) {
      Ok(approved) => approved,
      Err(e) => {
        prompt_error = Some(e);
        false
      }
    }
  }));
  if let Some(e) = prompt_error {
    return Err(e);
  }
  let result = result.context("Apply failed")?;

  if result.declined {
    print_info("Apply cancelled.");
    return Ok(());
  }

  let Some(report) = &result.report else {
    print_plan(&result.plan, verbose);
    print_outputs(&result.state.outputs);
    return Ok(());
  };

  println!();
  if !report.is_success() {
    print_report(report);
    if report.cancelled {
      bail!("Apply interrupted");
    }
    bail!(
      "Apply failed: {} resource(s) failed, {} skipped",
      report.failed.len(),
      report.skipped.len()
    );
  }

  print_success(&format!(
    "Apply complete! {} added, {} changed, {} replaced, {} destroyed in {}.",
    report.count(ChangeAction::Create),
    report.count(ChangeAction::Update),
    report.count(ChangeAction::Replace),
    report.count(ChangeAction::Delete),
    format_duration(started.elapsed())
  ));
  print_outputs(&result.state.outputs);

  Ok(())
}
