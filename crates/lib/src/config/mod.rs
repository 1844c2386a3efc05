//! Project configuration and the environment variable set.
//!
//! [`ProjectConfig`] is the parsed `infragraph.toml`. Its `[variables]`
//! table is merged with `INFRAGRAPH_VAR_*` environment variables and
//! `--var` overrides, then checked against the declared [`VARIABLES`] to
//! produce a typed [`EnvironmentConfig`].

mod load;
mod types;
mod validate;

pub use load::*;
pub use types::*;
pub use validate::*;
