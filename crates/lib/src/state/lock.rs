//! Lease locks guarding the state snapshot.
//!
//! A lease names its holder and expires on its own, so a crashed run blocks
//! others only until `expires_at`. A live lease held by someone else fails
//! fast with [`LockError::Contention`].
//!
//! A running apply keeps its lease alive through [`Lease::hold`], and every
//! state write first confirms the lease with [`Lease::renew`]. A run that
//! lost its lease stops writing.

use std::future::Future;
use std::io;
use std::pin::pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::{StateBackend, StateError};
use crate::util::unix_now;

const DEFAULT_LEASE_SECS: u64 = 30 * 60;
/// Expiry has one-second resolution; shorter leases could lapse between
/// renewals.
const MIN_LEASE_SECS: u64 = 2;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
  /// How long a lease is valid before another run may take it over.
  pub lease_secs: u64,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      lease_secs: DEFAULT_LEASE_SECS,
    }
  }
}

impl LockConfig {
  pub fn lease(&self) -> Duration {
    Duration::from_secs(self.lease_secs.max(MIN_LEASE_SECS))
  }
}

/// Metadata describing who holds the state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
  pub id: String,
  /// `user@host` of the holder.
  pub owner: String,
  /// Command that took the lock, e.g. `apply`.
  pub operation: String,
  pub pid: u32,
  pub created_at: u64,
  pub expires_at: u64,
}

impl LockInfo {
  pub fn new(operation: &str, lease: Duration) -> Self {
    let now = unix_now();
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      owner: crate::platform::lock_owner(),
      operation: operation.to_string(),
      pid: std::process::id(),
      created_at: now,
      expires_at: now.saturating_add(lease.as_secs()),
    }
  }

  pub fn is_expired_at(&self, now: u64) -> bool {
    now >= self.expires_at
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(unix_now())
  }
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "state is locked by {} ({} started at Unix timestamp {}, lease expires at {})\n\
     If you're sure no infragraph run is active, release it with:\n  infragraph force-unlock {}",
    .info.owner, .info.operation, .info.created_at, .info.expires_at, .info.id
  )]
  Contention { info: LockInfo, location: String },

  #[error(
    "state is locked (could not read lock metadata at {location})\n\
     If you're sure no infragraph run is active, remove the lock file"
  )]
  ContentionUnknown { location: String },

  #[error("lock ID '{requested}' does not match the current lock '{current}'")]
  Mismatch { requested: String, current: String },

  #[error("state is not locked")]
  NotLocked,

  #[error("lost the state lock '{id}': {reason}")]
  Lost { id: String, reason: String },

  #[error("failed to access lock file {location}: {source}")]
  Io { location: String, source: io::Error },

  #[error(transparent)]
  Backend(#[from] StateError),
}

/// A state lock held by this run.
pub struct Lease<'a> {
  backend: &'a dyn StateBackend,
  info: Mutex<LockInfo>,
  duration: Duration,
}

impl<'a> Lease<'a> {
  /// Take the lock on `backend` for `operation`.
  pub async fn acquire(backend: &'a dyn StateBackend, operation: &str, duration: Duration) -> Result<Self, LockError> {
    let info = backend.lock(operation, duration).await?;
    Ok(Self {
      backend,
      info: Mutex::new(info),
      duration,
    })
  }

  pub fn backend(&self) -> &'a dyn StateBackend {
    self.backend
  }

  pub fn info(&self) -> LockInfo {
    self.info.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn id(&self) -> String {
    self.info().id
  }

  /// Confirm the lock is still ours and extend it by a full lease.
  pub async fn renew(&self) -> Result<(), LockError> {
    let renewed = self.backend.renew(&self.info(), self.duration).await?;
    debug!(lock = %renewed.id, expires_at = renewed.expires_at, "state lock renewed");
    *self.info.lock().unwrap_or_else(PoisonError::into_inner) = renewed;
    Ok(())
  }

  /// Drive `work` to completion, renewing the lease every third of its
  /// duration.
  pub async fn hold<F: Future>(&self, work: F) -> F::Output {
    let period = (self.duration / 3).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut work = pin!(work);
    let mut renewing = true;

    loop {
      tokio::select! {
        output = &mut work => return output,
        _ = ticker.tick(), if renewing => match self.renew().await {
          Ok(()) => {}
          Err(e @ LockError::Lost { .. }) => {
            error!(error = %e, "state lock lost, further state writes will fail");
            renewing = false;
          }
          Err(e) => warn!(lock = %self.id(), error = %e, "failed to renew state lock"),
        },
      }
    }
  }

  /// Release the lock.
  pub async fn release(self) -> Result<(), LockError> {
    let info = self.info.into_inner().unwrap_or_else(PoisonError::into_inner);
    self.backend.unlock(&info).await
  }
}
