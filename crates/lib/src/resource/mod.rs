//! Resource kinds, their attribute schemas and node declarations.

mod kinds;
mod types;

pub use kinds::*;
pub use types::*;
