//! Refresh, diff and saved plans.
//!
//! [`refresh`] reads every recorded resource from its provider and reports
//! drift, [`compute_plan`] diffs the graph against the snapshot, and
//! [`SavedPlan`] carries a graph from `plan --out` to a later `apply`.

mod diff;
mod refresh;
mod saved;
mod types;

pub use diff::{classify, compute_plan};
pub use refresh::refresh;
pub use saved::{PLAN_FORMAT_VERSION, SavedPlan};
pub use types::*;
