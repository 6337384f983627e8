//! `lock` and `unlock` commands.

use std::path::Path;

use mediabundle::bundle::{lock_bundle, unlock_bundle};

use crate::error::CliError;

/// Lock the bundle at `path`.
pub fn run_lock(path: &Path, force: bool) -> Result<(), CliError> {
    if !lock_bundle(path, force)? {
        return Err(CliError::AlreadyLocked(path.to_path_buf()));
    }
    println!("Locked {}", path.display());
    Ok(())
}

/// Unlock the bundle at `path`.
pub fn run_unlock(path: &Path) -> Result<(), CliError> {
    if unlock_bundle(path)? {
        println!("Unlocked {}", path.display());
    } else {
        println!("{} was not locked", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabundle::bundle::is_locked;
    use tempfile::TempDir;

    #[test]
    fn test_lock_cycle() {
        let temp = TempDir::new().unwrap();

        run_lock(temp.path(), false).unwrap();
        assert!(is_locked(temp.path()));

        let err = run_lock(temp.path(), false).unwrap_err();
        assert!(matches!(err, CliError::AlreadyLocked(_)));
        run_lock(temp.path(), true).unwrap();

        run_unlock(temp.path()).unwrap();
        assert!(!is_locked(temp.path()));
        run_unlock(temp.path()).unwrap();
    }
}
