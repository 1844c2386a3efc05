//! A directory-backed stand-in for the cloud control plane.
//!
//! Every realized resource is a JSON document at `{root}/{kind}/{key}.json`.
//! Ids follow the ARM layout and outputs look like the real service's
//! (`*.azurecr.io` login servers, postgres FQDNs, app FQDNs). Deleting a
//! document by hand simulates an out-of-band change.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Provider, ProviderError, ProvisioningState, RemoteResource, ResourceRequest};
use crate::resource::{NodeId, ResourceKind};
use crate::state::ResourceState;
use crate::util::fs::write_atomic;
use crate::util::hash::hash_bytes;
use crate::util::unix_now;
use crate::value::Value;

const POSTGRES_PORT: u16 = 5432;

/// A realized resource as stored by [`LocalCloud`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDocument {
  pub kind: ResourceKind,
  pub name: String,
  pub remote_id: String,
  /// Non-sensitive attributes as last written.
  pub attributes: BTreeMap<String, serde_json::Value>,
  pub outputs: BTreeMap<String, serde_json::Value>,
  pub provisioning_state: ProvisioningState,
  pub created_at: u64,
  pub updated_at: u64,
}

#[derive(Debug, Clone)]
pub struct LocalCloud {
  root: PathBuf,
  subscription_id: String,
}

impl LocalCloud {
  pub fn new(root: impl Into<PathBuf>, subscription_id: impl Into<String>) -> Self {
    Self {
      root: root.into(),
      subscription_id: subscription_id.into(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn document_path(&self, kind: ResourceKind, key: &str) -> PathBuf {
    self.root.join(kind.as_str()).join(format!("{key}.json"))
  }

  /// Read a stored document, if present.
  pub fn document(&self, kind: ResourceKind, key: &str) -> Result<Option<CloudDocument>, ProviderError> {
    let path = self.document_path(kind, key);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(storage_error(&path, e)),
    };
    serde_json::from_str(&content)
      .map(Some)
      .map_err(|e| ProviderError::Storage(format!("{}: {e}", path.display())))
  }

  fn store(&self, key: &str, document: &CloudDocument) -> Result<(), ProviderError> {
    let path = self.document_path(document.kind, key);
    let body = serde_json::to_vec_pretty(document).map_err(|e| ProviderError::Storage(e.to_string()))?;
    write_atomic(&path, &body).map_err(|e| storage_error(&path, e))
  }

  fn documents(&self, kind: ResourceKind) -> Result<Vec<CloudDocument>, ProviderError> {
    let dir = self.root.join(kind.as_str());
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(storage_error(&dir, e)),
    };

    let mut documents = Vec::new();
    for entry in entries {
      let path = entry.map_err(|e| storage_error(&dir, e))?.path();
      if path.extension().is_some_and(|ext| ext == "json")
        && let Some(key) = path.file_stem().and_then(|s| s.to_str())
        && let Some(document) = self.document(kind, key)?
      {
        documents.push(document);
      }
    }
    Ok(documents)
  }

  fn require(&self, kind: ResourceKind, key: &str) -> Result<CloudDocument, ProviderError> {
    self
      .document(kind, key)?
      .ok_or_else(|| ProviderError::NotFound(format!("{kind} '{key}'")))
  }

  fn resource_group_id(&self, name: &str) -> String {
    format!("/subscriptions/{}/resourceGroups/{name}", self.subscription_id)
  }

  /// Storage key and display name for a request.
  fn identify(&self, request: &ResourceRequest) -> Result<(String, String), ProviderError> {
    match request.kind {
      ResourceKind::RoleAssignment => {
        let guid = role_assignment_guid(
          request.text("scope")?,
          request.text("role_definition_name")?,
          request.text("principal_id")?,
        );
        Ok((guid.clone(), guid))
      }
      ResourceKind::PostgresFirewallRule | ResourceKind::PostgresDatabase => {
        let name = request.text("name")?.to_string();
        let server = last_segment(request.text("server_id")?);
        Ok((format!("{server}_{name}"), name))
      }
      _ => {
        let name = request.text("name")?.to_string();
        Ok((name.clone(), name))
      }
    }
  }

  fn remote_id(&self, request: &ResourceRequest, name: &str) -> Result<String, ProviderError> {
    let kind = request.kind;
    let id = match kind {
      ResourceKind::ResourceGroup => self.resource_group_id(name),
      ResourceKind::RoleAssignment => format!(
        "{}/providers/Microsoft.Authorization/roleAssignments/{name}",
        request.text("scope")?
      ),
      ResourceKind::PostgresFirewallRule => format!("{}/firewallRules/{name}", request.text("server_id")?),
      ResourceKind::PostgresDatabase => format!("{}/databases/{name}", request.text("server_id")?),
      _ => {
        let arm_type = kind
          .arm_type()
          .ok_or_else(|| ProviderError::Rejected(format!("{kind} is not a cloud resource")))?;
        format!(
          "{}/providers/{arm_type}/{name}",
          self.resource_group_id(request.text("resource_group")?)
        )
      }
    };
    Ok(id)
  }

  /// Refuse requests whose parent resources do not exist.
  fn check_parents(&self, request: &ResourceRequest) -> Result<(), ProviderError> {
    if request.inputs.contains_key("resource_group") {
      self.require(ResourceKind::ResourceGroup, request.text("resource_group")?)?;
    }

    match request.kind {
      ResourceKind::PostgresFirewallRule | ResourceKind::PostgresDatabase => {
        self.require(
          ResourceKind::PostgresFlexibleServer,
          last_segment(request.text("server_id")?),
        )?;
      }
      ResourceKind::ContainerApp => {
        self.require(
          ResourceKind::ContainerAppEnvironment,
          last_segment(request.text("environment_id")?),
        )?;
      }
      ResourceKind::RoleAssignment => {
        self.require(ResourceKind::ContainerRegistry, last_segment(request.text("scope")?))?;
        let principal = request.text("principal_id")?;
        let known = self
          .documents(ResourceKind::UserAssignedIdentity)?
          .iter()
          .any(|identity| identity.outputs.get("principal_id").and_then(|v| v.as_str()) == Some(principal));
        if !known {
          return Err(ProviderError::NotFound(format!("principal '{principal}'")));
        }
      }
      _ => {}
    }
    Ok(())
  }

  fn derive_outputs(
    &self,
    request: &ResourceRequest,
    remote_id: &str,
    previous: Option<&CloudDocument>,
  ) -> Result<BTreeMap<String, serde_json::Value>, ProviderError> {
    use serde_json::Value as Json;

    let kept = |name: &str| previous.and_then(|doc| doc.outputs.get(name)).cloned();
    let mut outputs = BTreeMap::new();
    outputs.insert("id".to_string(), Json::from(remote_id));

    match request.kind {
      ResourceKind::ResourceGroup => {
        outputs.insert("name".to_string(), Json::from(request.text("name")?));
      }
      ResourceKind::LogAnalyticsWorkspace => {
        let workspace_id = kept("workspace_id").unwrap_or_else(|| Json::from(uuid::Uuid::new_v4().to_string()));
        let shared_key = kept("primary_shared_key").unwrap_or_else(|| Json::from(random_hex(32)));
        outputs.insert("workspace_id".to_string(), workspace_id);
        outputs.insert("primary_shared_key".to_string(), shared_key);
      }
      ResourceKind::ContainerRegistry => {
        let login_server = format!("{}.azurecr.io", request.text("name")?);
        outputs.insert("login_server".to_string(), Json::from(login_server));
      }
      ResourceKind::UserAssignedIdentity => {
        for name in ["principal_id", "client_id"] {
          let id = kept(name).unwrap_or_else(|| Json::from(uuid::Uuid::new_v4().to_string()));
          outputs.insert(name.to_string(), id);
        }
      }
      ResourceKind::PostgresFlexibleServer => {
        let fqdn = format!("{}.postgres.database.azure.com", request.text("name")?);
        outputs.insert("fqdn".to_string(), Json::from(fqdn));
      }
      ResourceKind::PostgresDatabase => {
        let connection_string = format!(
          "postgresql://{}:{}@{}:{POSTGRES_PORT}/{}?sslmode=require",
          urlencoding::encode(request.text("admin_login")?),
          urlencoding::encode(request.text("admin_password")?),
          request.text("server_fqdn")?,
          request.text("name")?,
        );
        outputs.insert("connection_string".to_string(), Json::from(connection_string));
      }
      ResourceKind::ContainerAppEnvironment => {
        let domain = kept("default_domain").unwrap_or_else(|| {
          let short = hash_bytes(remote_id.as_bytes());
          Json::from(format!(
            "{}.{}.azurecontainerapps.io",
            short.short(),
            request.text("location").unwrap_or("westeurope")
          ))
        });
        outputs.insert("default_domain".to_string(), domain);
      }
      ResourceKind::ContainerApp => {
        let name = request.text("name")?;
        let environment = self.require(
          ResourceKind::ContainerAppEnvironment,
          last_segment(request.text("environment_id")?),
        )?;
        let domain = environment
          .outputs
          .get("default_domain")
          .and_then(|v| v.as_str())
          .ok_or_else(|| ProviderError::Storage(format!("environment '{}' has no default domain", environment.name)))?;
        outputs.insert("fqdn".to_string(), Json::from(format!("{name}.{domain}")));

        let revealed: BTreeMap<&String, serde_json::Value> =
          request.inputs.iter().map(|(key, value)| (key, value.reveal())).collect();
        let body = serde_json::to_vec(&revealed).map_err(|e| ProviderError::Storage(e.to_string()))?;
        let revision = hash_bytes(&body);
        outputs.insert(
          "latest_revision".to_string(),
          Json::from(format!("{name}--{}", &revision.0[..7])),
        );
      }
      ResourceKind::RoleAssignment | ResourceKind::PostgresFirewallRule => {}
      ResourceKind::RandomPassword => {
        return Err(ProviderError::Rejected("random_password is not a cloud resource".to_string()));
      }
    }
    Ok(outputs)
  }

  fn to_remote(document: CloudDocument) -> RemoteResource {
    RemoteResource {
      remote_id: document.remote_id,
      attributes: document.attributes,
      outputs: document
        .outputs
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)))
        .collect(),
      state: document.provisioning_state,
    }
  }
}

#[async_trait]
impl Provider for LocalCloud {
  fn name(&self) -> &'static str {
    "local"
  }

  async fn create(&self, request: &ResourceRequest) -> Result<RemoteResource, ProviderError> {
    let (key, name) = self.identify(request)?;
    if self.document(request.kind, &key)?.is_some() {
      return Err(ProviderError::Conflict {
        kind: request.kind,
        name,
      });
    }
    self.check_parents(request)?;

    let remote_id = self.remote_id(request, &name)?;
    let now = unix_now();
    let document = CloudDocument {
      kind: request.kind,
      name,
      outputs: self.derive_outputs(request, &remote_id, None)?,
      remote_id,
      attributes: request.public_attributes(),
      provisioning_state: ProvisioningState::Succeeded,
      created_at: now,
      updated_at: now,
    };
    self.store(&key, &document)?;

    debug!(node = %request.id, kind = %request.kind, remote_id = %document.remote_id, "created");
    Ok(Self::to_remote(document))
  }

  async fn read(&self, id: &NodeId, current: &ResourceState) -> Result<Option<RemoteResource>, ProviderError> {
    let key = key_from_remote_id(current.kind, &current.remote_id);
    let document = self.document(current.kind, &key)?;
    if document.is_none() {
      debug!(node = %id, remote_id = %current.remote_id, "not found");
    }
    Ok(document.map(Self::to_remote))
  }

  async fn update(&self, request: &ResourceRequest, current: &ResourceState) -> Result<RemoteResource, ProviderError> {
    let key = key_from_remote_id(current.kind, &current.remote_id);
    let existing = self.require(current.kind, &key)?;
    self.check_parents(request)?;

    let document = CloudDocument {
      outputs: self.derive_outputs(request, &existing.remote_id, Some(&existing))?,
      attributes: request.public_attributes(),
      provisioning_state: ProvisioningState::Succeeded,
      updated_at: unix_now(),
      ..existing
    };
    self.store(&key, &document)?;

    debug!(node = %request.id, kind = %request.kind, remote_id = %document.remote_id, "updated");
    Ok(Self::to_remote(document))
  }

  async fn delete(&self, id: &NodeId, current: &ResourceState) -> Result<(), ProviderError> {
    let path = self.document_path(current.kind, &key_from_remote_id(current.kind, &current.remote_id));
    match fs::remove_file(&path) {
      Ok(()) => {
        debug!(node = %id, remote_id = %current.remote_id, "deleted");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(storage_error(&path, e)),
    }
  }

  async fn status(&self, kind: ResourceKind, remote_id: &str) -> Result<ProvisioningState, ProviderError> {
    let key = key_from_remote_id(kind, remote_id);
    Ok(self.require(kind, &key)?.provisioning_state)
  }
}

fn storage_error(path: &Path, e: io::Error) -> ProviderError {
  ProviderError::Storage(format!("{}: {e}", path.display()))
}

fn last_segment(id: &str) -> &str {
  id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}

/// Storage key of a resource given its remote id.
fn key_from_remote_id(kind: ResourceKind, remote_id: &str) -> String {
  let segments: Vec<&str> = remote_id.trim_end_matches('/').split('/').collect();
  match kind {
    ResourceKind::PostgresFirewallRule | ResourceKind::PostgresDatabase if segments.len() >= 3 => {
      format!("{}_{}", segments[segments.len() - 3], segments[segments.len() - 1])
    }
    _ => last_segment(remote_id).to_string(),
  }
}

/// Role assignment names are GUIDs derived from what they grant, so the same
/// grant always gets the same name.
fn role_assignment_guid(scope: &str, role: &str, principal: &str) -> String {
  let hash = hash_bytes(format!("{scope}|{role}|{principal}").as_bytes()).0;
  format!(
    "{}-{}-{}-{}-{}",
    &hash[0..8],
    &hash[8..12],
    &hash[12..16],
    &hash[16..20],
    &hash[20..32]
  )
}

fn random_hex(len: usize) -> String {
  let mut bytes = vec![0u8; len];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}
