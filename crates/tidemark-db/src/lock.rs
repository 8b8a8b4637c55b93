use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use tidemark_common::{Error, Result};
use tracing::{debug, warn};

/// Held for the duration of one migrator operation. Dropping it releases the lock.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Serializes migrator operations across processes.
///
/// The migrator acquires the lock before it reads the ledger and keeps the
/// guard until the operation returns, on success or failure.
pub trait MigrationLock {
    fn acquire(&self) -> Result<LockGuard>;
}

/// No locking: a single writer is assumed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl MigrationLock for NoLock {
    fn acquire(&self) -> Result<LockGuard> {
        Ok(LockGuard::noop())
    }
}

/// Lock held by exclusively creating a file, typically next to the database.
///
/// A migrator that crashed without releasing leaves the file behind; remove it
/// by hand once no other migrator is running.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MigrationLock for FileLock {
    fn acquire(&self) -> Result<LockGuard> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::Lock(format!(
                    "{} is held by another migrator",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(Error::Lock(format!(
                    "failed to create {}: {e}",
                    self.path.display()
                )));
            }
        };

        let path = self.path.clone();
        let guard = LockGuard::new(move || {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to release migration lock {}: {e}", path.display());
            } else {
                debug!("released migration lock {}", path.display());
            }
        });

        writeln!(file, "{}", std::process::id())?;
        debug!("acquired migration lock {}", self.path.display());
        Ok(guard)
    }
}
