//! Everything a command needs from the project: configuration, the resource
//! graph, the state backend and the provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use infragraph_lib::config::{EnvironmentConfig, ProjectConfig};
use infragraph_lib::consts::DEFAULT_CONFIG_FILE;
use infragraph_lib::execute::{CancelFlag, ExecuteConfig};
use infragraph_lib::graph::{ResourceGraph, build_graph};
use infragraph_lib::platform::paths::plans_dir;
use infragraph_lib::provider::{Providers, open_providers};
use infragraph_lib::state::{StateBackend, StateSnapshot, open_backend};

pub struct Project {
  pub config: ProjectConfig,
  pub config_path: PathBuf,
  overrides: Vec<String>,
  pub verbose: bool,
}

impl Project {
  /// Load the project file. A missing default file is treated as an empty
  /// project so that variables can come from the environment alone.
  pub fn load(path: Option<&Path>, overrides: &[String], verbose: bool) -> Result<Self> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = ProjectConfig::load_or_default(&config_path, path.is_some())
      .with_context(|| format!("Failed to load {}", config_path.display()))?;

    Ok(Self {
      config,
      config_path,
      overrides: overrides.to_vec(),
      verbose,
    })
  }

  /// The validated environment configuration.
  pub fn environment(&self) -> Result<EnvironmentConfig> {
    let values = self
      .config
      .variables_with_overrides(&self.overrides)
      .context("Invalid variable override")?;
    EnvironmentConfig::from_values(&values).context("Invalid configuration")
  }

  /// The validated resource graph.
  pub fn graph(&self) -> Result<ResourceGraph> {
    let environment = self.environment()?;
    build_graph(&environment).context("Invalid resource graph")
  }

  pub fn backend(&self) -> Result<Arc<dyn StateBackend>> {
    let backend = open_backend(&self.config).context("Failed to open state backend")?;
    debug!(backend = %backend.describe(), "state backend opened");
    Ok(backend)
  }

  pub fn providers(&self) -> Providers {
    open_providers(&self.config)
  }

  pub fn execute_config(&self, parallelism: Option<usize>) -> ExecuteConfig {
    let defaults = ExecuteConfig::default();
    ExecuteConfig {
      parallelism: parallelism.unwrap_or(defaults.parallelism).max(1),
      retry: self.config.retry.clone(),
    }
  }

  /// Load the current snapshot without locking.
  pub fn load_state(&self, runtime: &Runtime) -> Result<Option<StateSnapshot>> {
    let backend = self.backend()?;
    runtime.block_on(backend.load()).context("Failed to load state")
  }
}

/// Relative plan files live in the plans directory.
pub fn plan_path(path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    plans_dir().join(path)
  }
}

pub fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}

/// A flag set by the first Ctrl-C. Running provider operations finish and
/// are recorded; nothing new is scheduled.
pub fn cancel_on_ctrl_c(runtime: &Runtime) -> CancelFlag {
  let flag = CancelFlag::new();
  let handle = flag.clone();
  runtime.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, waiting for running operations to finish");
      handle.cancel();
    }
  });
  flag
}
