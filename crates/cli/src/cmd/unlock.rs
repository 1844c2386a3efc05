//! Implementation of the `infragraph force-unlock` command.

use anyhow::{Context, Result};

use crate::cmd::context::{Project, runtime};
use crate::output::{print_info, print_success};
use crate::prompts::confirm;

pub fn cmd_force_unlock(project: &Project, lock_id: &str, force: bool) -> Result<()> {
  let backend = project.backend()?;

  let message = format!(
    "Release lock {} on {}? Only do this if no other infragraph run is active.",
    lock_id,
    backend.describe()
  );
  if !confirm(&message, force, "--force")? {
    print_info("Lock kept.");
    return Ok(());
  }

  let rt = runtime()?;
  rt.block_on(backend.force_unlock(lock_id))
    .with_context(|| format!("Failed to release lock {}", lock_id))?;

  print_success(&format!("Released lock {}.", lock_id));
  Ok(())
}
