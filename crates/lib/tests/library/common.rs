//! Shared fixtures: a temporary project with a local backend and a provider
//! that can inject failures and records every call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use infragraph_lib::config::{ConfigValue, EnvironmentConfig};
use infragraph_lib::execute::{ApplyOptions, CancelFlag, DestroyOptions, ExecuteConfig};
use infragraph_lib::graph::{ResourceGraph, build_graph};
use infragraph_lib::provider::{
  LocalCloud, Provider, ProviderError, Providers, ProvisioningState, RemoteResource, ResourceRequest, RetryConfig,
};
use infragraph_lib::resource::{NodeId, ResourceKind};
use infragraph_lib::state::{LocalBackend, ResourceState, StateBackend, StateSnapshot};

/// A provider call as seen by [`FaultyProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
  pub operation: &'static str,
  pub node: NodeId,
}

/// Wraps [`LocalCloud`], failing selected calls and recording all of them.
pub struct FaultyProvider {
  inner: LocalCloud,
  failures: Mutex<HashMap<(&'static str, ResourceKind), VecDeque<ProviderError>>>,
  cancel_after: Mutex<Option<(ResourceKind, CancelFlag)>>,
  provisioning: Mutex<HashMap<ResourceKind, VecDeque<ProvisioningState>>>,
  slow_creates: Mutex<HashMap<ResourceKind, Duration>>,
  calls: Mutex<Vec<Call>>,
}

impl FaultyProvider {
  pub fn new(inner: LocalCloud) -> Self {
    Self {
      inner,
      failures: Mutex::new(HashMap::new()),
      cancel_after: Mutex::new(None),
      provisioning: Mutex::new(HashMap::new()),
      slow_creates: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Fail the next `operation` on a `kind` resource with `error`. Queued
  /// failures are consumed in order.
  pub fn fail_next(&self, operation: &'static str, kind: ResourceKind, error: ProviderError) {
    self
      .failures
      .lock()
      .unwrap()
      .entry((operation, kind))
      .or_default()
      .push_back(error);
  }

  /// Set `flag` once a `kind` resource has been created.
  pub fn cancel_after_create(&self, kind: ResourceKind, flag: CancelFlag) {
    *self.cancel_after.lock().unwrap() = Some((kind, flag));
  }

  /// Report the next `kind` create as still provisioning, then answer
  /// status polls with `states` in order.
  pub fn provision_with(&self, kind: ResourceKind, states: impl IntoIterator<Item = ProvisioningState>) {
    self.provisioning.lock().unwrap().insert(kind, states.into_iter().collect());
  }

  /// Make every `kind` create take `delay` before it returns.
  pub fn slow_create(&self, kind: ResourceKind, delay: Duration) {
    self.slow_creates.lock().unwrap().insert(kind, delay);
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_of(&self, operation: &str) -> Vec<NodeId> {
    self
      .calls()
      .into_iter()
      .filter(|c| c.operation == operation)
      .map(|c| c.node)
      .collect()
  }

  fn enter(&self, operation: &'static str, node: &NodeId, kind: ResourceKind) -> Result<(), ProviderError> {
    self.calls.lock().unwrap().push(Call {
      operation,
      node: node.clone(),
    });
    let injected = self
      .failures
      .lock()
      .unwrap()
      .get_mut(&(operation, kind))
      .and_then(VecDeque::pop_front);
    match injected {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl Provider for FaultyProvider {
  fn name(&self) -> &'static str {
    "faulty"
  }

  async fn create(&self, request: &ResourceRequest) -> Result<RemoteResource, ProviderError> {
    self.enter("create", &request.id, request.kind)?;
    let delay = self.slow_creates.lock().unwrap().get(&request.kind).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    let mut created = self.inner.create(request).await?;
    if self
      .provisioning
      .lock()
      .unwrap()
      .get(&request.kind)
      .is_some_and(|states| !states.is_empty())
    {
      created.state = ProvisioningState::Provisioning;
    }
    if let Some((kind, flag)) = self.cancel_after.lock().unwrap().as_ref()
      && *kind == request.kind
    {
      flag.cancel();
    }
    Ok(created)
  }

  async fn read(&self, id: &NodeId, current: &ResourceState) -> Result<Option<RemoteResource>, ProviderError> {
    self.enter("read", id, current.kind)?;
    self.inner.read(id, current).await
  }

  async fn update(&self, request: &ResourceRequest, current: &ResourceState) -> Result<RemoteResource, ProviderError> {
    self.enter("update", &request.id, request.kind)?;
    self.inner.update(request, current).await
  }

  async fn delete(&self, id: &NodeId, current: &ResourceState) -> Result<(), ProviderError> {
    self.enter("delete", id, current.kind)?;
    self.inner.delete(id, current).await
  }

  async fn status(&self, kind: ResourceKind, remote_id: &str) -> Result<ProvisioningState, ProviderError> {
    let scripted = self
      .provisioning
      .lock()
      .unwrap()
      .get_mut(&kind)
      .and_then(VecDeque::pop_front);
    match scripted {
      Some(state) => Ok(state),
      None => self.inner.status(kind, remote_id).await,
    }
  }
}

/// An isolated project: state file, local cloud and the faulty provider in
/// a temporary directory.
pub struct TestProject {
  pub temp: TempDir,
  pub backend: LocalBackend,
  pub cloud: LocalCloud,
  pub provider: Arc<FaultyProvider>,
  pub providers: Providers,
}

impl TestProject {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let backend = LocalBackend::new(temp.path().join("state.json"));
    let cloud = LocalCloud::new(temp.path().join("cloud"), "00000000-0000-0000-0000-000000000000");
    let provider = Arc::new(FaultyProvider::new(cloud.clone()));
    let providers = Providers::new(provider.clone());
    Self {
      temp,
      backend,
      cloud,
      provider,
      providers,
    }
  }

  pub async fn state(&self) -> Option<StateSnapshot> {
    self.backend.load().await.unwrap()
  }

  /// Remove a resource's document behind infragraph's back.
  pub fn delete_out_of_band(&self, kind: ResourceKind, key: &str) {
    std::fs::remove_file(self.cloud.document_path(kind, key)).unwrap();
  }
}

/// Variables of the `fitapp` development environment, with `overrides`.
pub fn fitapp_values(overrides: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
  let mut values: BTreeMap<String, ConfigValue> = [
    ("prefix", ConfigValue::from("fitapp")),
    ("environment", ConfigValue::from("dev")),
    ("app_port", ConfigValue::from(8030i64)),
    ("min_replicas", ConfigValue::from(1i64)),
    ("max_replicas", ConfigValue::from(1i64)),
  ]
  .into_iter()
  .map(|(name, value)| (name.to_string(), value))
  .collect();
  for (name, value) in overrides {
    values.insert(name.to_string(), value.clone());
  }
  values
}

pub fn fitapp_graph(overrides: &[(&str, ConfigValue)]) -> ResourceGraph {
  let config = EnvironmentConfig::from_values(&fitapp_values(overrides)).unwrap();
  build_graph(&config).unwrap()
}

/// Retries without waiting.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
  RetryConfig {
    max_attempts,
    ..RetryConfig::immediate()
  }
}

pub fn apply_options() -> ApplyOptions {
  ApplyOptions {
    execute: ExecuteConfig {
      parallelism: 4,
      retry: fast_retry(3),
    },
    ..ApplyOptions::default()
  }
}

pub fn destroy_options() -> DestroyOptions {
  DestroyOptions {
    execute: ExecuteConfig {
      parallelism: 4,
      retry: fast_retry(3),
    },
    ..DestroyOptions::default()
  }
}
