//! Library integration tests: full plan/apply/destroy runs against the
//! directory-backed cloud.

mod apply_tests;
mod common;
mod destroy_tests;
mod failure_tests;
mod plan_tests;
