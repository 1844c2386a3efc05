//! State snapshot persistence and locking.
//!
//! The snapshot records, per node, the inputs a resource was realized with
//! and the outputs it produced. It is rewritten after every completed
//! provider operation, so an interrupted apply leaves a consistent, resumable
//! record. Backends also provide the lease lock that serializes applies.

mod backend;
mod http;
mod local;
mod lock;
mod types;

pub use backend::*;
pub use http::HttpBackend;
pub use local::LocalBackend;
pub use lock::*;
pub use types::*;
