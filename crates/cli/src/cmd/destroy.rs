//! Implementation of the `infragraph destroy` command.
//!
//! Deletes every resource recorded in the state, dependents first.

use anyhow::{Context, Result, bail};

use infragraph_lib::execute::{DestroyOptions, destroy_with};
use infragraph_lib::plan::ChangeAction;

use crate::cmd::context::{Project, cancel_on_ctrl_c, runtime};
use crate::output::{print_info, print_plan, print_report, print_success};
use crate::prompts::{confirm, ensure_interactive};

const APPROVE_FLAG: &str = "--auto-approve";

pub fn cmd_destroy(project: &Project, auto_approve: bool, dry_run: bool) -> Result<()> {
  if !auto_approve && !dry_run {
    ensure_interactive(APPROVE_FLAG)?;
  }

  let backend = project.backend()?;
  let providers = project.providers();
  let rt = runtime()?;
  let options = DestroyOptions {
    execute: project.execute_config(None),
    lock: project.config.lock.clone(),
    cancel: cancel_on_ctrl_c(&rt),
    dry_run,
  };

  let verbose = project.verbose;
  let mut prompt_error = None;
  let result = rt.block_on(destroy_with(backend.as_ref(), &providers, &options, |plan| {
    print_plan(plan, verbose);
    println!();
    match confirm("Destroy all of these resources?", auto_approve, APPROVE_FLAG) {
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
  let result = result.context("Destroy failed")?;

  if dry_run {
    print_plan(&result.plan, verbose);
    print_info("Dry run: nothing was destroyed.");
    return Ok(());
  }
  if result.declined {
    print_info("Destroy cancelled.");
    return Ok(());
  }

  let Some(report) = &result.report else {
    print_info("Nothing to destroy.");
    return Ok(());
  };

  println!();
  if !report.is_success() {
    print_report(report);
    bail!(
      "Destroy failed: {} resource(s) failed, {} remain in the state",
      report.failed.len(),
      result.state.as_ref().map_or(0, |s| s.resources.len())
    );
  }

  print_success(&format!(
    "Destroy complete! {} resource(s) destroyed.",
    report.count(ChangeAction::Delete)
  ));
  Ok(())
}
