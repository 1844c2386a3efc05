mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{
  Project, StateCommand, cmd_apply, cmd_destroy, cmd_force_unlock, cmd_init, cmd_output, cmd_plan, cmd_state,
  cmd_validate,
};
use output::OutputFormat;

/// infragraph - declarative provisioning for a container app and its database
#[derive(Parser)]
#[command(name = "infragraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the project file (default: infragraph.toml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Set a variable, overriding the project file and environment
  #[arg(long = "var", value_name = "NAME=VALUE", global = true)]
  vars: Vec<String>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Write a template project file
  Init {
    /// Directory to initialize (default: current directory)
    dir: Option<PathBuf>,

    /// Resource name prefix (default: derived from the directory name)
    #[arg(long)]
    prefix: Option<String>,

    /// Environment name
    #[arg(long, default_value = "dev")]
    environment: String,
  },

  /// Check the configuration and the resource graph without calling the provider
  Validate {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show the changes apply would make
  Plan {
    /// Save the plan for a later `apply FILE`
    #[arg(long)]
    out: Option<PathBuf>,

    /// Exit with 2 when there are changes, 0 when there are none
    #[arg(long)]
    detailed_exitcode: bool,

    /// Read every recorded resource from the provider first
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    refresh: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Create, update and delete resources to match the configuration
  Apply {
    /// A plan saved with `plan --out`
    plan: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(long)]
    auto_approve: bool,

    /// Maximum number of concurrent provider operations
    #[arg(long)]
    parallelism: Option<usize>,

    /// Read every recorded resource from the provider first
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    refresh: bool,
  },

  /// Delete every resource recorded in the state
  Destroy {
    /// Skip the confirmation prompt
    #[arg(long)]
    auto_approve: bool,

    /// Show what would be deleted without deleting anything
    #[arg(long)]
    dry_run: bool,
  },

  /// Inspect the state snapshot
  #[command(subcommand)]
  State(StateCommand),

  /// Show root outputs
  Output {
    /// Output to show (default: all)
    name: Option<String>,

    /// Print the bare value, revealing it if sensitive
    #[arg(long)]
    raw: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Release a state lock left behind by an interrupted run
  ForceUnlock {
    /// ID of the lock to release
    lock_id: String,

    /// Skip the confirmation prompt
    #[arg(long)]
    force: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let project = || Project::load(cli.config.as_deref(), &cli.vars, cli.verbose);

  match cli.command {
    Commands::Init {
      ref dir,
      ref prefix,
      ref environment,
    } => cmd_init(dir.as_deref(), prefix.as_deref(), environment),
    Commands::Validate { output } => cmd_validate(&project()?, output),
    Commands::Plan {
      ref out,
      detailed_exitcode,
      refresh,
      output,
    } => cmd_plan(&project()?, out.as_deref(), detailed_exitcode, refresh, output),
    Commands::Apply {
      ref plan,
      auto_approve,
      parallelism,
      refresh,
    } => cmd_apply(&project()?, plan.as_deref(), auto_approve, parallelism, refresh),
    Commands::Destroy { auto_approve, dry_run } => cmd_destroy(&project()?, auto_approve, dry_run),
    Commands::State(ref command) => cmd_state(&project()?, command),
    Commands::Output {
      ref name,
      raw,
      output,
    } => cmd_output(&project()?, name.as_deref(), raw, output),
    Commands::ForceUnlock { ref lock_id, force } => cmd_force_unlock(&project()?, lock_id, force),
  }
}
