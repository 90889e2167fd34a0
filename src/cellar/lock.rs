// src/cellar/lock.rs

//! Exclusive lock over the shared prefix
//!
//! Only the link step mutates the shared prefix, and it does so while holding
//! `<prefix>/.install.lock`. Build phases work in package-private directories
//! and never take this lock.
//!
//! # Example
//!
//! ```no_run
//! use formulary::cellar::PrefixLock;
//!
//! let lock = PrefixLock::acquire("/opt/formulary/prefix/.install.lock")?;
//! // ... swap symlinks ...
//! drop(lock);
//! # Ok::<(), formulary::Error>(())
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive `flock` on the prefix lock file, released on drop
#[derive(Debug)]
pub struct PrefixLock {
    /// The lock file handle (kept open to maintain lock)
    file: File,
    path: PathBuf,
}

impl PrefixLock {
    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Error::Lock(format!("Failed to open {}: {}", path.display(), e)))
    }

    /// Acquire the lock, blocking until it is available
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;

        file.lock_exclusive()
            .map_err(|e| Error::Lock(format!("Failed to acquire prefix lock: {}", e)))?;

        debug!("Acquired prefix lock at {}", path.display());
        Ok(Self { file, path })
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns `Ok(None)` if another process holds it.
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired prefix lock at {}", path.display());
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Prefix lock already held at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::Lock(format!(
                "Failed to try-acquire prefix lock: {}",
                e
            ))),
        }
    }

    /// Check whether any process holds the lock, without keeping it
    pub fn is_held<P: AsRef<Path>>(path: P) -> bool {
        let Ok(file) = File::open(path.as_ref()) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released prefix lock at {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_lock() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".install.lock");

        let lock = PrefixLock::acquire(&lock_path).unwrap();
        assert!(lock_path.exists());
        assert!(PrefixLock::is_held(&lock_path));
        assert_eq!(lock.path(), lock_path);

        drop(lock);
        assert!(!PrefixLock::is_held(&lock_path));
    }

    #[test]
    fn test_try_acquire_fails_when_held() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".install.lock");

        let _lock1 = PrefixLock::acquire(&lock_path).unwrap();
        assert!(PrefixLock::try_acquire(&lock_path).unwrap().is_none());
    }

    #[test]
    fn test_is_held_when_no_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!PrefixLock::is_held(temp_dir.path().join("missing.lock")));
    }

    #[test]
    fn test_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("prefix").join(".install.lock");

        let lock = PrefixLock::try_acquire(&lock_path).unwrap();
        assert!(lock.is_some());
        assert!(lock_path.exists());
    }
}
