//! Implementation of the `infragraph init` command.
//!
//! Writes a template `infragraph.toml` and keeps the working directory out of
//! version control.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use infragraph_lib::init::{InitOptions, init};

use crate::output::symbols;

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if `infragraph.toml` already exists, no valid prefix can
/// be derived, or a file cannot be written.
pub fn cmd_init(dir: Option<&Path>, prefix: Option<&str>, environment: &str) -> Result<()> {
  let options = InitOptions {
    dir: dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
    prefix: prefix.map(str::to_string),
    environment: environment.to_string(),
  };

  let result = init(&options).context("Failed to initialize project")?;

  println!(
    "{} {}",
    symbols::SUCCESS.green(),
    "Initialized infragraph project!".green().bold()
  );
  println!();
  println!("  {} Project file: {}", symbols::INFO.cyan(), result.config_file.display());
  println!("  {} Prefix:       {}", symbols::INFO.cyan(), result.prefix);
  if let Some(gitignore) = &result.gitignore {
    println!("  {} Ignore file:  {}", symbols::INFO.cyan(), gitignore.display());
  }
  println!();
  println!("{}", "Next steps:".bold());
  println!(
    "  1. Edit {} to describe your environment",
    result.config_file.display().to_string().cyan()
  );
  println!("  2. Run: {}", "infragraph plan".cyan());

  Ok(())
}
