mod apply_tests;
mod common;
mod destroy_tests;
mod plan_tests;
mod state_tests;
mod validate_tests;
