//! Construction of the container-app resource graph.

use tracing::debug;

use super::{GraphError, ResourceGraph};
use crate::config::EnvironmentConfig;
use crate::resource::{ResourceDeclaration, ResourceKind};
use crate::value::{Segment, Value};

/// Node ids of the graph [`build_graph`] produces.
pub mod nodes {
  pub const RESOURCE_GROUP: &str = "resource_group";
  pub const LOG_ANALYTICS: &str = "log_analytics";
  pub const CONTAINER_REGISTRY: &str = "container_registry";
  pub const MANAGED_IDENTITY: &str = "managed_identity";
  pub const ACR_PULL: &str = "acr_pull";
  pub const DB_PASSWORD: &str = "db_password";
  pub const POSTGRES_SERVER: &str = "postgres_server";
  pub const POSTGRES_FIREWALL_AZURE: &str = "postgres_firewall_azure";
  pub const POSTGRES_DATABASE: &str = "postgres_database";
  pub const CONTAINER_APP_ENVIRONMENT: &str = "container_app_environment";
  pub const CONTAINER_APP: &str = "container_app";
}

use nodes::*;

/// Name of the secret carrying the database URL inside the container app.
pub const DB_URL_SECRET: &str = "db-url";

const PASSWORD_LENGTH: u32 = 24;
const PASSWORD_CLASS_MINIMUM: u32 = 2;

/// Build and validate the resource graph for one environment.
pub fn build_graph(config: &EnvironmentConfig) -> Result<ResourceGraph, GraphError> {
  let p = &config.prefix;
  let e = &config.environment;
  let tags = Value::from(config.resource_tags());
  let rg_name = Value::reference(RESOURCE_GROUP, "name");

  let mut graph = ResourceGraph::new();

  graph.add(
    ResourceDeclaration::new(RESOURCE_GROUP, ResourceKind::ResourceGroup)
      .with_input("name", format!("rg-{p}-{e}"))
      .with_input("location", &config.location)
      .with_input("tags", tags.clone()),
  );

  graph.add(
    ResourceDeclaration::new(LOG_ANALYTICS, ResourceKind::LogAnalyticsWorkspace)
      .with_input("name", format!("log-{p}-{e}"))
      .with_input("location", &config.location)
      .with_input("resource_group", rg_name.clone())
      .with_input("sku", "PerGB2018")
      .with_input("retention_in_days", config.log_retention_days)
      .with_input("tags", tags.clone()),
  );

  graph.add(
    ResourceDeclaration::new(CONTAINER_REGISTRY, ResourceKind::ContainerRegistry)
      .with_input("name", format!("acr{p}{e}"))
      .with_input("location", &config.location)
      .with_input("resource_group", rg_name.clone())
      .with_input("sku", &config.acr_sku)
      .with_input("admin_enabled", false)
      .with_input("tags", tags.clone()),
  );

  graph.add(
    ResourceDeclaration::new(MANAGED_IDENTITY, ResourceKind::UserAssignedIdentity)
      .with_input("name", format!("id-{p}-{e}"))
      .with_input("location", &config.location)
      .with_input("resource_group", rg_name.clone())
      .with_input("tags", tags.clone()),
  );

  graph.add(
    ResourceDeclaration::new(ACR_PULL, ResourceKind::RoleAssignment)
      .with_input("scope", Value::reference(CONTAINER_REGISTRY, "id"))
      .with_input("role_definition_name", "AcrPull")
      .with_input("principal_id", Value::reference(MANAGED_IDENTITY, "principal_id")),
  );

  let admin_password = match &config.pg_admin_password {
    Some(secret) => Value::sensitive(secret.expose()),
    None => {
      graph.add(
        ResourceDeclaration::new(DB_PASSWORD, ResourceKind::RandomPassword)
          .with_input("length", PASSWORD_LENGTH)
          .with_input("special", true)
          .with_input("min_upper", PASSWORD_CLASS_MINIMUM)
          .with_input("min_lower", PASSWORD_CLASS_MINIMUM)
          .with_input("min_numeric", PASSWORD_CLASS_MINIMUM)
          .with_input("min_special", PASSWORD_CLASS_MINIMUM),
      );
      Value::reference(DB_PASSWORD, "result")
    }
  };

  graph.add(
    ResourceDeclaration::new(POSTGRES_SERVER, ResourceKind::PostgresFlexibleServer)
      .with_input("name", format!("psql-{p}-{e}"))
      .with_input("location", &config.location)
      .with_input("resource_group", rg_name.clone())
      .with_input("version", &config.pg_version)
      .with_input("administrator_login", &config.pg_admin_login)
      .with_input("administrator_password", admin_password.clone())
      .with_input("sku_name", &config.pg_sku_name)
      .with_input("storage_mb", config.pg_storage_mb)
      .with_input("public_network_access", config.pg_public_access)
      .with_input("tags", tags.clone()),
  );

  if config.pg_public_access {
    // 0.0.0.0 to 0.0.0.0 is the service's marker for "Azure-internal traffic".
    graph.add(
      ResourceDeclaration::new(POSTGRES_FIREWALL_AZURE, ResourceKind::PostgresFirewallRule)
        .with_input("name", "AllowAzureServices")
        .with_input("server_id", Value::reference(POSTGRES_SERVER, "id"))
        .with_input("start_ip", "0.0.0.0")
        .with_input("end_ip", "0.0.0.0"),
    );
  }

  graph.add(
    ResourceDeclaration::new(POSTGRES_DATABASE, ResourceKind::PostgresDatabase)
      .with_input("name", format!("{p}db"))
      .with_input("server_id", Value::reference(POSTGRES_SERVER, "id"))
      .with_input("charset", "UTF8")
      .with_input("collation", "en_US.utf8")
      .with_input("server_fqdn", Value::reference(POSTGRES_SERVER, "fqdn"))
      .with_input("admin_login", &config.pg_admin_login)
      .with_input("admin_password", admin_password),
  );

  graph.add(
    ResourceDeclaration::new(CONTAINER_APP_ENVIRONMENT, ResourceKind::ContainerAppEnvironment)
      .with_input("name", format!("cae-{p}-{e}"))
      .with_input("location", &config.location)
      .with_input("resource_group", rg_name.clone())
      .with_input(
        "log_analytics_workspace_id",
        Value::reference(LOG_ANALYTICS, "workspace_id"),
      )
      .with_input(
        "log_analytics_shared_key",
        Value::reference(LOG_ANALYTICS, "primary_shared_key"),
      )
      .with_input("tags", tags.clone()),
  );

  let image = Value::template(vec![
    Segment::reference(CONTAINER_REGISTRY, "login_server"),
    Segment::literal(format!("/{}:{}", config.image_name, config.image_tag)),
  ]);
  let env = Value::list([
    Value::map([("name", "DB_URL"), ("secret_ref", DB_URL_SECRET)]),
    Value::map([("name", "PORT".to_string()), ("value", config.app_port.to_string())]),
  ]);

  graph.add(
    ResourceDeclaration::new(CONTAINER_APP, ResourceKind::ContainerApp)
      .with_input("name", format!("ca-{p}-{e}"))
      .with_input("resource_group", rg_name)
      .with_input("environment_id", Value::reference(CONTAINER_APP_ENVIRONMENT, "id"))
      .with_input("identity_id", Value::reference(MANAGED_IDENTITY, "id"))
      .with_input("registry_server", Value::reference(CONTAINER_REGISTRY, "login_server"))
      .with_input("image", image)
      .with_input("cpu", config.cpu)
      .with_input("memory", &config.memory)
      .with_input("min_replicas", config.min_replicas)
      .with_input("max_replicas", config.max_replicas)
      .with_input("target_port", config.app_port)
      .with_input("external_ingress", true)
      .with_input(
        "secrets",
        Value::map([(DB_URL_SECRET, Value::reference(POSTGRES_DATABASE, "connection_string"))]),
      )
      .with_input("env", env)
      .with_input("tags", tags),
  );

  graph.add_output(
    "registry_login_server",
    Value::reference(CONTAINER_REGISTRY, "login_server"),
    false,
    "Login server images are pushed to",
  );
  graph.add_output(
    "app_url",
    Value::template(vec![Segment::literal("https://"), Segment::reference(CONTAINER_APP, "fqdn")]),
    false,
    "Public URL of the application",
  );
  graph.add_output(
    "database_connection_string",
    Value::reference(POSTGRES_DATABASE, "connection_string"),
    true,
    "PostgreSQL connection string including credentials",
  );

  graph.validate()?;
  debug!(nodes = graph.len(), prefix = %p, environment = %e, "resource graph built");
  Ok(graph)
}
