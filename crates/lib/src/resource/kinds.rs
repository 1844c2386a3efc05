use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// How a change to an attribute is applied to an existing resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
  /// The provider can update the attribute on the live resource.
  InPlace,
  /// The resource must be deleted and created again.
  ForceReplace,
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeSchema {
  pub name: &'static str,
  pub policy: ChangePolicy,
  /// Whether a sensitive value may be placed here. Only secret stores
  /// and credential attributes accept one.
  pub accepts_sensitive: bool,
}

/// Marker in [`OutputSchema::derived_from`] for outputs that change with any
/// attribute.
pub const ANY_ATTRIBUTE: &str = "*";

#[derive(Debug, Clone, Copy)]
pub struct OutputSchema {
  pub name: &'static str,
  /// Always sensitive, regardless of inputs.
  pub sensitive: bool,
  /// Inputs this output is computed from. A sensitive input makes the output
  /// sensitive, and changing one makes the output unknown until applied.
  pub derived_from: &'static [&'static str],
}

impl OutputSchema {
  /// True when changing `changed` attributes alters this output.
  pub fn affected_by(&self, changed: &[&str]) -> bool {
    if changed.is_empty() {
      return false;
    }
    self.derived_from.contains(&ANY_ATTRIBUTE) || self.derived_from.iter().any(|name| changed.contains(name))
  }
}

#[derive(Debug)]
pub struct ResourceSchema {
  pub attributes: &'static [AttributeSchema],
  pub outputs: &'static [OutputSchema],
}

const fn replace(name: &'static str) -> AttributeSchema {
  AttributeSchema {
    name,
    policy: ChangePolicy::ForceReplace,
    accepts_sensitive: false,
  }
}

const fn in_place(name: &'static str) -> AttributeSchema {
  AttributeSchema {
    name,
    policy: ChangePolicy::InPlace,
    accepts_sensitive: false,
  }
}

const fn secret(name: &'static str) -> AttributeSchema {
  AttributeSchema {
    name,
    policy: ChangePolicy::InPlace,
    accepts_sensitive: true,
  }
}

const fn output(name: &'static str) -> OutputSchema {
  OutputSchema {
    name,
    sensitive: false,
    derived_from: &[],
  }
}

const fn derived(name: &'static str, derived_from: &'static [&'static str]) -> OutputSchema {
  OutputSchema {
    name,
    sensitive: false,
    derived_from,
  }
}

const fn sensitive(name: &'static str, derived_from: &'static [&'static str]) -> OutputSchema {
  OutputSchema {
    name,
    sensitive: true,
    derived_from,
  }
}

static RESOURCE_GROUP: ResourceSchema = ResourceSchema {
  attributes: &[replace("name"), replace("location"), in_place("tags")],
  outputs: &[output("id"), output("name")],
};

static LOG_ANALYTICS_WORKSPACE: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("location"),
    replace("resource_group"),
    in_place("sku"),
    in_place("retention_in_days"),
    in_place("tags"),
  ],
  outputs: &[output("id"), output("workspace_id"), sensitive("primary_shared_key", &[])],
};

static CONTAINER_REGISTRY: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("location"),
    replace("resource_group"),
    in_place("sku"),
    in_place("admin_enabled"),
    in_place("tags"),
  ],
  outputs: &[output("id"), derived("login_server", &["name"])],
};

static USER_ASSIGNED_IDENTITY: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("location"),
    replace("resource_group"),
    in_place("tags"),
  ],
  outputs: &[output("id"), output("principal_id"), output("client_id")],
};

static ROLE_ASSIGNMENT: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("scope"),
    replace("role_definition_name"),
    replace("principal_id"),
  ],
  outputs: &[output("id")],
};

static RANDOM_PASSWORD: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("length"),
    replace("special"),
    replace("min_upper"),
    replace("min_lower"),
    replace("min_numeric"),
    replace("min_special"),
  ],
  outputs: &[output("id"), sensitive("result", &[])],
};

static POSTGRES_FLEXIBLE_SERVER: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("location"),
    replace("resource_group"),
    replace("version"),
    replace("administrator_login"),
    secret("administrator_password"),
    in_place("sku_name"),
    in_place("storage_mb"),
    in_place("public_network_access"),
    in_place("tags"),
  ],
  outputs: &[output("id"), derived("fqdn", &["name"])],
};

static POSTGRES_FIREWALL_RULE: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("server_id"),
    replace("start_ip"),
    replace("end_ip"),
  ],
  outputs: &[output("id")],
};

static POSTGRES_DATABASE: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("server_id"),
    replace("charset"),
    replace("collation"),
    in_place("server_fqdn"),
    in_place("admin_login"),
    secret("admin_password"),
  ],
  outputs: &[
    output("id"),
    sensitive("connection_string", &["name", "server_fqdn", "admin_login", "admin_password"]),
  ],
};

static CONTAINER_APP_ENVIRONMENT: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("location"),
    replace("resource_group"),
    replace("log_analytics_workspace_id"),
    secret("log_analytics_shared_key"),
    in_place("tags"),
  ],
  outputs: &[output("id"), output("default_domain")],
};

static CONTAINER_APP: ResourceSchema = ResourceSchema {
  attributes: &[
    replace("name"),
    replace("resource_group"),
    replace("environment_id"),
    in_place("identity_id"),
    in_place("registry_server"),
    in_place("image"),
    in_place("cpu"),
    in_place("memory"),
    in_place("min_replicas"),
    in_place("max_replicas"),
    in_place("target_port"),
    in_place("external_ingress"),
    secret("secrets"),
    in_place("env"),
    in_place("tags"),
  ],
  outputs: &[
    output("id"),
    derived("fqdn", &["name", "environment_id"]),
    derived("latest_revision", &[ANY_ATTRIBUTE]),
  ],
};

/// The resource kinds the engine knows how to manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  ResourceGroup,
  LogAnalyticsWorkspace,
  ContainerRegistry,
  UserAssignedIdentity,
  RoleAssignment,
  RandomPassword,
  PostgresFlexibleServer,
  PostgresFirewallRule,
  PostgresDatabase,
  ContainerAppEnvironment,
  ContainerApp,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 11] = [
    ResourceKind::ResourceGroup,
    ResourceKind::LogAnalyticsWorkspace,
    ResourceKind::ContainerRegistry,
    ResourceKind::UserAssignedIdentity,
    ResourceKind::RoleAssignment,
    ResourceKind::RandomPassword,
    ResourceKind::PostgresFlexibleServer,
    ResourceKind::PostgresFirewallRule,
    ResourceKind::PostgresDatabase,
    ResourceKind::ContainerAppEnvironment,
    ResourceKind::ContainerApp,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ResourceKind::ResourceGroup => "resource_group",
      ResourceKind::LogAnalyticsWorkspace => "log_analytics_workspace",
      ResourceKind::ContainerRegistry => "container_registry",
      ResourceKind::UserAssignedIdentity => "user_assigned_identity",
      ResourceKind::RoleAssignment => "role_assignment",
      ResourceKind::RandomPassword => "random_password",
      ResourceKind::PostgresFlexibleServer => "postgres_flexible_server",
      ResourceKind::PostgresFirewallRule => "postgres_firewall_rule",
      ResourceKind::PostgresDatabase => "postgres_database",
      ResourceKind::ContainerAppEnvironment => "container_app_environment",
      ResourceKind::ContainerApp => "container_app",
    }
  }

  pub fn schema(self) -> &'static ResourceSchema {
    match self {
      ResourceKind::ResourceGroup => &RESOURCE_GROUP,
      ResourceKind::LogAnalyticsWorkspace => &LOG_ANALYTICS_WORKSPACE,
      ResourceKind::ContainerRegistry => &CONTAINER_REGISTRY,
      ResourceKind::UserAssignedIdentity => &USER_ASSIGNED_IDENTITY,
      ResourceKind::RoleAssignment => &ROLE_ASSIGNMENT,
      ResourceKind::RandomPassword => &RANDOM_PASSWORD,
      ResourceKind::PostgresFlexibleServer => &POSTGRES_FLEXIBLE_SERVER,
      ResourceKind::PostgresFirewallRule => &POSTGRES_FIREWALL_RULE,
      ResourceKind::PostgresDatabase => &POSTGRES_DATABASE,
      ResourceKind::ContainerAppEnvironment => &CONTAINER_APP_ENVIRONMENT,
      ResourceKind::ContainerApp => &CONTAINER_APP,
    }
  }

  /// ARM resource type, for kinds that live in the cloud.
  pub fn arm_type(self) -> Option<&'static str> {
    match self {
      ResourceKind::ResourceGroup => Some("Microsoft.Resources/resourceGroups"),
      ResourceKind::LogAnalyticsWorkspace => Some("Microsoft.OperationalInsights/workspaces"),
      ResourceKind::ContainerRegistry => Some("Microsoft.ContainerRegistry/registries"),
      ResourceKind::UserAssignedIdentity => Some("Microsoft.ManagedIdentity/userAssignedIdentities"),
      ResourceKind::RoleAssignment => Some("Microsoft.Authorization/roleAssignments"),
      ResourceKind::RandomPassword => None,
      ResourceKind::PostgresFlexibleServer => Some("Microsoft.DBforPostgreSQL/flexibleServers"),
      ResourceKind::PostgresFirewallRule => Some("Microsoft.DBforPostgreSQL/flexibleServers/firewallRules"),
      ResourceKind::PostgresDatabase => Some("Microsoft.DBforPostgreSQL/flexibleServers/databases"),
      ResourceKind::ContainerAppEnvironment => Some("Microsoft.App/managedEnvironments"),
      ResourceKind::ContainerApp => Some("Microsoft.App/containerApps"),
    }
  }

  /// False for kinds the engine realizes itself without a cloud call.
  pub fn is_remote(self) -> bool {
    self.arm_type().is_some()
  }

  pub fn attribute(self, name: &str) -> Option<&'static AttributeSchema> {
    self.schema().attributes.iter().find(|a| a.name == name)
  }

  pub fn output(self, name: &str) -> Option<&'static OutputSchema> {
    self.schema().outputs.iter().find(|o| o.name == name)
  }

  /// Change policy for an attribute. Attributes without a schema entry are
  /// updated in place.
  pub fn policy(self, attribute: &str) -> ChangePolicy {
    self
      .attribute(attribute)
      .map(|a| a.policy)
      .unwrap_or(ChangePolicy::InPlace)
  }

  pub fn accepts_sensitive(self, attribute: &str) -> bool {
    self.attribute(attribute).is_some_and(|a| a.accepts_sensitive)
  }

  /// Whether `output` is sensitive for a node realized from `inputs`.
  pub fn output_is_sensitive(self, output: &str, inputs: &BTreeMap<String, Value>) -> bool {
    let Some(schema) = self.output(output) else {
      return false;
    };
    schema.sensitive
      || schema
        .derived_from
        .iter()
        .filter(|name| **name != ANY_ATTRIBUTE)
        .any(|name| inputs.get(*name).is_some_and(Value::is_sensitive))
  }

  /// Tags raw provider outputs with the sensitivity the schema assigns them.
  pub fn tag_outputs(
    self,
    inputs: &BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
  ) -> BTreeMap<String, Value> {
    outputs
      .into_iter()
      .map(|(name, value)| {
        let value = if self.output_is_sensitive(&name, inputs) {
          Value::sensitive(value)
        } else {
          value
        };
        (name, value)
      })
      .collect()
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
