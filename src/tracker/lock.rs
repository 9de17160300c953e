use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::{MigrateError, Result};

/// Exclusive advisory lock on a file; released on drop.
pub struct LockGuard {
    file: File,
}

impl LockGuard {
    /// Take the lock without blocking, failing if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| MigrateError::Locked(path.display().to_string()))?;

        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
