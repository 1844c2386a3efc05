//! infragraph-lib: core types and logic for infragraph
//!
//! This crate provides everything behind the `infragraph` command:
//! - `config`: the project file and the typed environment configuration
//! - `graph`: the container-app resource graph, its validation and ordering
//! - `plan`: refresh, diff and saved plans
//! - `execute`: applying plans and tearing resources down
//! - `state`: the persisted snapshot and its lease lock
//! - `provider`: the seam to the service that realizes resources

pub mod config;
pub mod consts;
pub mod execute;
pub mod graph;
pub mod init;
pub mod plan;
pub mod platform;
pub mod provider;
pub mod resource;
pub mod state;
pub mod util;
pub mod value;
