// SPDX-License-Identifier: Apache-2.0

//! File-locking primitives the multiplexer's state machine is built from.
//!
//! State (§4.3.2) is defined purely by the presence and lock status of
//! files on disk, not by any in-process bookkeeping, so every process
//! touching a given tunnel identity observes the same state.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

/// An exclusive lock on a single file, released on `Drop`.
///
/// Mirrors the `ConaryLabs` daemon lock: open-or-create, take an
/// exclusive `flock`, and let closing the file handle release it.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    fn open(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).write(true).open(path)
    }

    /// Blocks until the lock is held.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns `Ok(None)` immediately if the lock is already held elsewhere,
    /// rather than blocking.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Polls `try_acquire` every `poll_interval` until `timeout` elapses.
    /// The global lock is advisory on POSIX and mandatory on Windows;
    /// either way callers should not assume sub-poll-interval latency
    /// (§4.3.5).
    pub fn acquire_with_timeout(
        path: &Path,
        poll_interval: Duration,
        timeout: Duration,
    ) -> io::Result<Option<Self>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(Some(lock));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(poll_interval);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// True if `path` exists and is currently held by someone else (used by
/// the watcher to distinguish a live client lock file from a stale one
/// left behind by a crash).
pub fn is_locked(path: &Path) -> io::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    match OpenOptions::new().write(true).open(path) {
        Ok(file) => match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(false)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_then_try_acquire_fails_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lock");
        let held = FileLock::acquire(&path).unwrap();
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
        drop(held);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("a.lock");
        FileLock::acquire(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn acquire_with_timeout_returns_none_when_never_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lock");
        let _held = FileLock::acquire(&path).unwrap();
        let result =
            FileLock::acquire_with_timeout(&path, Duration::from_millis(10), Duration::from_millis(50))
                .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn is_locked_reflects_live_vs_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.lock");
        let held = FileLock::acquire(&path).unwrap();
        assert!(is_locked(&path).unwrap());
        drop(held);
        assert!(!is_locked(&path).unwrap());
    }

    #[test]
    fn is_locked_is_false_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.lock");
        assert!(!is_locked(&path).unwrap());
    }
}
