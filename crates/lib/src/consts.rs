/// Name used for the binary, the home directory and resource tags.
pub const APP_NAME: &str = "infragraph";

/// Overrides the working directory (`./.infragraph`) when set.
pub const HOME_ENV: &str = "INFRAGRAPH_HOME";

/// Environment variables with this prefix set configuration variables.
pub const VAR_ENV_PREFIX: &str = "INFRAGRAPH_VAR_";

pub const DEFAULT_CONFIG_FILE: &str = "infragraph.toml";

/// Port the packaged application listens on. Ingress must target it.
pub const APP_LISTEN_PORT: u16 = 8030;

/// Hex characters kept when a fingerprint is shortened for display.
pub const FINGERPRINT_SHORT_LEN: usize = 12;

/// Shortest password accepted for the database administrator.
pub const MIN_PASSWORD_LENGTH: usize = 16;

/// Roles a workload identity may be granted on the registry.
pub const PULL_ONLY_ROLES: &[&str] = &["AcrPull"];
