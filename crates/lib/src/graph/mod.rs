//! The desired resource graph.
//!
//! [`build_graph`] turns a validated [`EnvironmentConfig`] into the
//! container-app resource graph, [`ResourceGraph::validate`] checks
//! references, sensitivity and least privilege, and [`ExecutionDag`] orders
//! the nodes for planning and execution.
//!
//! [`EnvironmentConfig`]: crate::config::EnvironmentConfig

mod builder;
mod dag;
mod types;
mod validate;

pub use builder::{build_graph, nodes};
pub use dag::ExecutionDag;
pub use types::*;
