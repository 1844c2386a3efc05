pub mod paths;

/// Identity recorded in lock metadata, as `user@host`.
pub fn lock_owner() -> String {
  let host = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
  format!("{}@{}", whoami::username(), host)
}
