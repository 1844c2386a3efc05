//! Template content for the init command.

/// Template for `infragraph.toml`. Contains `{prefix}` and `{environment}`
/// placeholders for substitution.
pub const CONFIG_TEMPLATE: &str = r#"# infragraph project configuration.
#
# Variables can also be set with INFRAGRAPH_VAR_<name> environment variables
# or `--var name=value` on the command line, which take precedence.

[variables]
prefix = "{prefix}"
environment = "{environment}"
location = "westeurope"

# Container app
image_name = "app"
image_tag = "latest"
cpu = 0.5
memory = "1Gi"
min_replicas = 1
max_replicas = 1
app_port = 8030

# PostgreSQL flexible server. Leave pg_admin_password unset to have a
# password generated and kept in the state.
pg_version = "16"
pg_sku_name = "B_Standard_B1ms"
pg_storage_mb = 32768
pg_public_access = true

[variables.tags]
owner = "platform"

[backend]
type = "local"
path = ".infragraph/state.json"

[provider]
type = "local"
root = ".infragraph/cloud"

[retry]
max_attempts = 5
base_delay_ms = 500
max_delay_ms = 30000
backoff_factor = 2.0

[lock]
lease_secs = 1800
"#;

/// Lines added to `.gitignore`. The state holds secrets.
pub const GITIGNORE_TEMPLATE: &str = "# infragraph state, local cloud and saved plans\n.infragraph/\n*.plan\n";
