use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{LockError, LockInfo, STATE_FORMAT_VERSION, StateBackend, StateError, StateSnapshot};
use crate::util::fs::write_atomic;
use crate::util::unix_now;

/// State kept in a JSON file, with the lease lock in a sibling
/// `<file>.lock` and the previous revision in `<file>.backup`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
  path: PathBuf,
}

impl LocalBackend {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn lock_path(&self) -> PathBuf {
    sibling(&self.path, "lock")
  }

  pub fn backup_path(&self) -> PathBuf {
    sibling(&self.path, "backup")
  }

  fn location(&self) -> String {
    self.path.display().to_string()
  }

  fn read_lock(&self) -> Result<Option<LockInfo>, LockError> {
    let lock_path = self.lock_path();
    match fs::read_to_string(&lock_path) {
      Ok(content) => Ok(serde_json::from_str(&content).ok()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LockError::NotLocked),
      Err(source) => Err(LockError::Io {
        location: lock_path.display().to_string(),
        source,
      }),
    }
  }

  /// Create the lock file exclusively. `Ok(false)` means it already exists.
  fn try_create_lock(&self, info: &LockInfo) -> Result<bool, LockError> {
    let lock_path = self.lock_path();
    let io_err = |source| LockError::Io {
      location: lock_path.display().to_string(),
      source,
    };

    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
      Ok(file) => file,
      Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
      Err(e) => return Err(io_err(e)),
    };

    let body = serde_json::to_vec_pretty(info).map_err(|e| io_err(io::Error::other(e)))?;
    file.write_all(&body).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(true)
  }

  fn remove_lock(&self) -> Result<(), LockError> {
    let lock_path = self.lock_path();
    fs::remove_file(&lock_path).map_err(|source| LockError::Io {
      location: lock_path.display().to_string(),
      source,
    })
  }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(format!(".{suffix}"));
  path.with_file_name(name)
}

#[async_trait]
impl StateBackend for LocalBackend {
  fn describe(&self) -> String {
    self.location()
  }

  async fn load(&self) -> Result<Option<StateSnapshot>, StateError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %self.path.display(), "no state file");
        return Ok(None);
      }
      Err(source) => {
        return Err(StateError::Read {
          location: self.location(),
          source,
        });
      }
    };

    let state: StateSnapshot = serde_json::from_str(&content).map_err(|source| StateError::Parse {
      location: self.location(),
      source,
    })?;
    if state.version != STATE_FORMAT_VERSION {
      return Err(StateError::UnsupportedVersion {
        found: state.version,
        expected: STATE_FORMAT_VERSION,
      });
    }

    debug!(path = %self.path.display(), serial = state.serial, resources = state.resources.len(), "state loaded");
    Ok(Some(state))
  }

  async fn save(&self, state: &StateSnapshot) -> Result<(), StateError> {
    let write_err = |source| StateError::Write {
      location: self.location(),
      source,
    };

    if self.path.exists() {
      fs::copy(&self.path, self.backup_path()).map_err(write_err)?;
    }

    let content = serde_json::to_vec_pretty(state).map_err(StateError::Serialize)?;
    write_atomic(&self.path, &content).map_err(write_err)?;

    debug!(path = %self.path.display(), serial = state.serial, "state saved");
    Ok(())
  }

  async fn lock(&self, operation: &str, lease: Duration) -> Result<LockInfo, LockError> {
    let info = LockInfo::new(operation, lease);

    if self.try_create_lock(&info)? {
      info!(lock = %info.id, operation, "state lock acquired");
      return Ok(info);
    }

    let location = self.lock_path().display().to_string();
    let existing = match self.read_lock() {
      Ok(Some(existing)) => existing,
      // Released between our attempt and the read.
      Err(LockError::NotLocked) => {
        return if self.try_create_lock(&info)? {
          Ok(info)
        } else {
          Err(LockError::ContentionUnknown { location })
        };
      }
      Ok(None) => return Err(LockError::ContentionUnknown { location }),
      Err(e) => return Err(e),
    };

    if !existing.is_expired() {
      return Err(LockError::Contention { info: existing, location });
    }

    warn!(
      lock = %existing.id,
      owner = %existing.owner,
      expired_at = existing.expires_at,
      "taking over expired state lock"
    );
    self.remove_lock()?;
    if self.try_create_lock(&info)? {
      info!(lock = %info.id, operation, "state lock acquired");
      Ok(info)
    } else {
      match self.read_lock() {
        Ok(Some(winner)) => Err(LockError::Contention { info: winner, location }),
        _ => Err(LockError::ContentionUnknown { location }),
      }
    }
  }

  async fn renew(&self, lock: &LockInfo, lease: Duration) -> Result<LockInfo, LockError> {
    let lost = |reason: String| LockError::Lost {
      id: lock.id.clone(),
      reason,
    };
    let current = match self.read_lock() {
      Ok(Some(current)) => current,
      Ok(None) => return Err(lost("the lock file is unreadable".to_string())),
      Err(LockError::NotLocked) => return Err(lost("the lock was released".to_string())),
      Err(e) => return Err(e),
    };
    if current.id != lock.id {
      return Err(lost(format!("{} now holds it for {}", current.owner, current.operation)));
    }
    // Only an expired lease can be taken over, so a live one is safe to rewrite.
    if current.is_expired() {
      return Err(lost(format!("the lease expired at Unix timestamp {}", current.expires_at)));
    }

    let renewed = LockInfo {
      expires_at: unix_now().saturating_add(lease.as_secs()),
      ..current
    };
    let lock_path = self.lock_path();
    let body = serde_json::to_vec_pretty(&renewed).map_err(StateError::Serialize)?;
    write_atomic(&lock_path, &body).map_err(|source| LockError::Io {
      location: lock_path.display().to_string(),
      source,
    })?;
    Ok(renewed)
  }

  async fn unlock(&self, lock: &LockInfo) -> Result<(), LockError> {
    match self.read_lock()? {
      Some(current) if current.id != lock.id => Err(LockError::Mismatch {
        requested: lock.id.clone(),
        current: current.id,
      }),
      _ => {
        self.remove_lock()?;
        debug!(lock = %lock.id, "state lock released");
        Ok(())
      }
    }
  }

  async fn force_unlock(&self, id: &str) -> Result<(), LockError> {
    match self.read_lock()? {
      Some(current) if current.id != id => Err(LockError::Mismatch {
        requested: id.to_string(),
        current: current.id,
      }),
      _ => {
        self.remove_lock()?;
        warn!(lock = id, "state lock force-released");
        Ok(())
      }
    }
  }
}
