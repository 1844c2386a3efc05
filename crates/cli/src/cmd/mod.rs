mod apply;
mod context;
mod destroy;
mod init;
mod output;
mod plan;
mod state;
mod unlock;
mod validate;

pub use apply::cmd_apply;
pub use context::Project;
pub use destroy::cmd_destroy;
pub use init::cmd_init;
pub use output::cmd_output;
pub use plan::cmd_plan;
pub use state::{StateCommand, cmd_state};
pub use unlock::cmd_force_unlock;
pub use validate::cmd_validate;
