use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{HttpBackend, LocalBackend, LockError, LockInfo, StateError, StateSnapshot};
use crate::config::{ProjectConfig, Secret};
use crate::platform::paths::default_state_path;

/// Where the state snapshot lives.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum BackendConfig {
  Local {
    #[serde(default)]
    path: Option<std::path::PathBuf>,
  },
  Http {
    address: String,
    #[serde(default)]
    lock_address: Option<String>,
    #[serde(default)]
    unlock_address: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<Secret>,
  },
}

impl Default for BackendConfig {
  fn default() -> Self {
    BackendConfig::Local { path: None }
  }
}

/// Storage and locking for the state snapshot.
#[async_trait]
pub trait StateBackend: Send + Sync {
  /// Human-readable location, used in messages.
  fn describe(&self) -> String;

  /// Load the snapshot, or `None` when none has been written yet.
  async fn load(&self) -> Result<Option<StateSnapshot>, StateError>;

  async fn save(&self, state: &StateSnapshot) -> Result<(), StateError>;

  /// Acquire the lease for `operation`.
  async fn lock(&self, operation: &str, lease: std::time::Duration) -> Result<LockInfo, LockError>;

  /// Extend a lease this run holds to `lease` from now. Fails with
  /// [`LockError::Lost`] if the lease was released, expired or taken over.
  async fn renew(&self, lock: &LockInfo, lease: std::time::Duration) -> Result<LockInfo, LockError>;

  /// Release a lease previously returned by [`StateBackend::lock`].
  async fn unlock(&self, lock: &LockInfo) -> Result<(), LockError>;

  /// Remove the lease with `id`, whoever holds it.
  async fn force_unlock(&self, id: &str) -> Result<(), LockError>;
}

/// Open the backend a project configuration names.
pub fn open_backend(config: &ProjectConfig) -> Result<Arc<dyn StateBackend>, StateError> {
  match &config.backend {
    BackendConfig::Local { path } => {
      let path = match path {
        Some(path) => config.resolve_path(path),
        None => default_state_path(),
      };
      Ok(Arc::new(LocalBackend::new(path)))
    }
    BackendConfig::Http {
      address,
      lock_address,
      unlock_address,
      username,
      password,
    } => {
      let mut backend = HttpBackend::new(address.clone())?;
      if let Some(lock) = lock_address {
        backend = backend.with_lock_address(lock.clone());
      }
      if let Some(unlock) = unlock_address {
        backend = backend.with_unlock_address(unlock.clone());
      }
      if let Some(username) = username {
        backend = backend.with_basic_auth(username.clone(), password.clone());
      }
      Ok(Arc::new(backend))
    }
  }
}
