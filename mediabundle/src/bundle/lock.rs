//! Advisory bundle locking.
//!
//! A bundle is locked while a `__lock.lck` file exists at its root. The lock
//! is purely advisory: it signals other processes, nothing stops a process
//! that ignores it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error};

use super::LOCK_FILENAME;
use crate::error::{BundleError, BundleResult};

/// Path of the lock file for the bundle at `dir`.
pub fn lock_file(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILENAME)
}

/// Whether the bundle at `dir` is locked.
pub fn is_locked(dir: &Path) -> bool {
    lock_file(dir).exists()
}

/// Lock the bundle at `dir`.
///
/// Returns `Ok(false)` if the bundle is already locked and `force` is not
/// set. With `force`, an existing lock is overwritten.
///
/// # Errors
///
/// [`BundleError::NotFound`] if `dir` does not exist, or an I/O error while
/// writing the lock file.
pub fn lock_bundle(dir: &Path, force: bool) -> BundleResult<bool> {
    if !dir.is_dir() {
        return Err(BundleError::NotFound(dir.to_path_buf()));
    }
    let path = lock_file(dir);
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = match options.open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %dir.display(), "Bundle already locked");
            return Ok(false);
        }
        Err(e) => return Err(BundleError::write(&path, e)),
    };
    writeln!(
        file,
        "pid={}\nlocked_at={}",
        std::process::id(),
        Utc::now().to_rfc3339()
    )
    .map_err(|e| BundleError::write(&path, e))?;
    debug!(path = %dir.display(), force, "Bundle locked");
    Ok(true)
}

/// Remove the lock of the bundle at `dir`.
///
/// Returns `Ok(false)` if the bundle was not locked.
pub fn unlock_bundle(dir: &Path) -> BundleResult<bool> {
    let path = lock_file(dir);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %dir.display(), "Bundle unlocked");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BundleError::write(&path, e)),
    }
}

/// A held bundle lock, released when dropped.
#[derive(Debug)]
pub struct BundleLock {
    dir: PathBuf,
    held: bool,
}

impl BundleLock {
    /// Lock the bundle at `dir`.
    ///
    /// # Errors
    ///
    /// [`BundleError::LockUnavailable`] if the bundle is already locked.
    pub fn acquire(dir: &Path) -> BundleResult<Self> {
        if !lock_bundle(dir, false)? {
            return Err(BundleError::LockUnavailable(dir.to_path_buf()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            held: true,
        })
    }

    /// Directory whose lock is held.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Follow the locked directory after it was renamed.
    pub(crate) fn moved_to(&mut self, dir: &Path) {
        self.dir = dir.to_path_buf();
    }

    /// Forget the lock without removing it, e.g. after the bundle was deleted.
    pub(crate) fn disarm(mut self) {
        self.held = false;
    }

    /// Release the lock, reporting failures.
    pub fn release(mut self) -> BundleResult<()> {
        self.held = false;
        unlock_bundle(&self.dir).map(|_| ())
    }
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = unlock_bundle(&self.dir) {
                error!(path = %self.dir.display(), error = %e, "Failed to release bundle lock");
            }
        }
    }
}
