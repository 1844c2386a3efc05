//! Filesystem helpers shared by the state backend and the local cloud.

use std::fs;
use std::io;
use std::path::Path;

/// Write `bytes` to `path` via a temporary file and rename, so readers never
/// observe a partially written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent)?;
  }
  let tmp_path = path.with_extension("tmp");
  fs::write(&tmp_path, bytes)?;
  fs::rename(&tmp_path, path)
}
