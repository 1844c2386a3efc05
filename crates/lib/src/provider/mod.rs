//! The seam between the engine and the service that realizes resources.
//!
//! A [`Provider`] creates, reads, updates and deletes one resource at a
//! time and reports its provisioning state. Every call the engine makes goes
//! through [`with_retry`], and creates/updates are followed by
//! [`wait_until_ready`].

mod local;
mod random;
mod retry;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalCloud;
pub use random::{PasswordPolicy, RandomProvider, generate_password};
pub use retry::{RetryConfig, wait_until_ready, with_retry};

use crate::config::ProjectConfig;
use crate::platform::paths::default_cloud_root;
use crate::resource::{NodeId, ResourceKind};
use crate::state::ResourceState;
use crate::value::Value;

const DEFAULT_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
  #[error("{kind} '{name}' already exists")]
  Conflict { kind: ResourceKind, name: String },

  #[error("{0} not found")]
  NotFound(String),

  #[error("permission denied: {0}")]
  Permission(String),

  #[error("quota exceeded: {0}")]
  Quota(String),

  #[error("request rejected: {0}")]
  Rejected(String),

  #[error("transient failure: {0}")]
  Transient(String),

  #[error("timed out waiting for {0}")]
  Timeout(String),

  #[error("provisioning failed: {0}")]
  ProvisioningFailed(String),

  #[error("{operation} gave up after {attempts} attempts: {last}")]
  RetriesExhausted {
    operation: String,
    attempts: u32,
    last: String,
  },

  #[error("provider storage error: {0}")]
  Storage(String),
}

impl ProviderError {
  /// Transient failures are retried with backoff; everything else is
  /// returned to the caller immediately.
  pub fn is_transient(&self) -> bool {
    matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
  }
}

/// Provisioning state reported by [`Provider::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
  Provisioning,
  Succeeded,
  Failed,
}

impl ProvisioningState {
  pub fn is_terminal(self) -> bool {
    !matches!(self, ProvisioningState::Provisioning)
  }
}

impl fmt::Display for ProvisioningState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ProvisioningState::Provisioning => "Provisioning",
      ProvisioningState::Succeeded => "Succeeded",
      ProvisioningState::Failed => "Failed",
    };
    f.write_str(s)
  }
}

/// A create or update request with every input resolved.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
  pub id: NodeId,
  pub kind: ResourceKind,
  pub inputs: BTreeMap<String, Value>,
}

impl ResourceRequest {
  /// A string input, looking through any sensitive wrapper.
  pub fn text(&self, name: &str) -> Result<&str, ProviderError> {
    self
      .inputs
      .get(name)
      .and_then(|v| v.plain().as_str())
      .ok_or_else(|| ProviderError::Rejected(format!("{} '{}': attribute '{name}' must be a string", self.kind, self.id)))
  }

  /// Non-sensitive inputs as plain JSON, the view a provider reports back
  /// on read. Sensitive inputs are write-only.
  pub fn public_attributes(&self) -> BTreeMap<String, serde_json::Value> {
    public_attributes(&self.inputs)
  }
}

pub fn public_attributes(inputs: &BTreeMap<String, Value>) -> BTreeMap<String, serde_json::Value> {
  inputs
    .iter()
    .filter(|(_, value)| !value.is_sensitive())
    .map(|(name, value)| (name.clone(), value.reveal()))
    .collect()
}

/// A resource as the provider sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResource {
  pub remote_id: String,
  /// Realized non-sensitive attributes, compared against recorded inputs to
  /// detect drift.
  pub attributes: BTreeMap<String, serde_json::Value>,
  /// Raw outputs. The engine applies the schema's sensitivity.
  pub outputs: BTreeMap<String, Value>,
  pub state: ProvisioningState,
}

#[async_trait]
pub trait Provider: Send + Sync {
  fn name(&self) -> &'static str;

  async fn create(&self, request: &ResourceRequest) -> Result<RemoteResource, ProviderError>;

  /// Read the live resource, or `None` when it no longer exists.
  async fn read(&self, id: &NodeId, current: &ResourceState) -> Result<Option<RemoteResource>, ProviderError>;

  async fn update(&self, request: &ResourceRequest, current: &ResourceState) -> Result<RemoteResource, ProviderError>;

  /// Delete the resource. Deleting something already gone succeeds.
  async fn delete(&self, id: &NodeId, current: &ResourceState) -> Result<(), ProviderError>;

  async fn status(&self, kind: ResourceKind, remote_id: &str) -> Result<ProvisioningState, ProviderError>;
}

/// Which provider realizes the remote resources.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum ProviderConfig {
  Local {
    #[serde(default)]
    root: Option<PathBuf>,
    #[serde(default = "default_subscription")]
    subscription_id: String,
  },
}

fn default_subscription() -> String {
  DEFAULT_SUBSCRIPTION.to_string()
}

impl Default for ProviderConfig {
  fn default() -> Self {
    ProviderConfig::Local {
      root: None,
      subscription_id: default_subscription(),
    }
  }
}

/// Routes each resource kind to the provider that realizes it.
#[derive(Clone)]
pub struct Providers {
  remote: Arc<dyn Provider>,
  random: Arc<dyn Provider>,
}

impl Providers {
  pub fn new(remote: Arc<dyn Provider>) -> Self {
    Self {
      remote,
      random: Arc::new(RandomProvider),
    }
  }

  pub fn for_kind(&self, kind: ResourceKind) -> Arc<dyn Provider> {
    if kind.is_remote() {
      self.remote.clone()
    } else {
      self.random.clone()
    }
  }

  pub fn remote(&self) -> &Arc<dyn Provider> {
    &self.remote
  }
}

/// Build the providers a project configuration names.
pub fn open_providers(config: &ProjectConfig) -> Providers {
  match &config.provider {
    ProviderConfig::Local { root, subscription_id } => {
      let root = match root {
        Some(root) => config.resolve_path(root),
        None => default_cloud_root(),
      };
      Providers::new(Arc::new(LocalCloud::new(root, subscription_id.clone())))
    }
  }
}
