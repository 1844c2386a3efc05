use anyhow::{Result, bail};
use std::io::{self, IsTerminal, Write};

/// Fails unless a confirmation prompt can be shown. `flag` names the option
/// that skips the prompt.
pub fn ensure_interactive(flag: &str) -> Result<()> {
  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Cannot prompt for confirmation in non-interactive mode. Use {flag} to proceed.");
  }
  Ok(())
}

pub fn confirm(message: &str, assume_yes: bool, flag: &str) -> Result<bool> {
  if assume_yes {
    return Ok(true);
  }
  ensure_interactive(flag)?;

  write!(io::stderr(), "{} [y/N] ", message)?;
  io::stderr().flush()?;

  let mut input = String::new();
  io::stdin().read_line(&mut input)?;

  Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
