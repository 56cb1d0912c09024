//! Write-lock file handling.
//!
//! Cross-process write exclusion is a marker file inside the repository's
//! `.git/` directory holding the id of the transaction currently allowed to
//! write. It exists only between write escalation and commit/rollback; reads
//! never touch it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors from write-lock handling.
#[derive(Debug, Error)]
pub enum WriteLockError {
    /// The lock file already exists.
    #[error("write lock already held by transaction {holder}")]
    Held { holder: String },

    /// The lock file could not be created or removed.
    #[error("write lock io failure")]
    Io(#[from] io::Error),

    /// The blocking task could not be joined.
    #[error("write lock task failed: {0}")]
    Task(String),
}

/// Path of the write-lock marker for a repository.
pub(crate) fn lock_path(repo_path: &Path, file_name: &str) -> PathBuf {
    repo_path.join(".git").join(file_name)
}

/// Atomically acquire the write lock for `tx_id`.
///
/// Creation uses `create_new` so two escalating processes cannot both win;
/// the loser sees [`WriteLockError::Held`] with the current owner's id.
pub(crate) async fn acquire(path: PathBuf, tx_id: String) -> Result<(), WriteLockError> {
    tokio::task::spawn_blocking(move || {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(tx_id.as_bytes())?;
                debug!(lock = %path.display(), tx_id = %tx_id, "acquired write lock");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(WriteLockError::Held { holder })
            }
            Err(e) => Err(WriteLockError::Io(e)),
        }
    })
    .await
    .map_err(|e| WriteLockError::Task(e.to_string()))?
}

/// Release the write lock. Best-effort: logs on failure, never errors.
pub(crate) async fn release(path: PathBuf, tx_id: String) {
    let result = tokio::task::spawn_blocking(move || {
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(lock = %path.display(), tx_id = %tx_id, "released write lock");
        }
        Ok::<(), io::Error>(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("failed to release write lock: {e}"),
        Err(e) => warn!("write lock release task failed: {e}"),
    }
}

/// Read the id of the transaction currently holding the lock, if any.
pub(crate) fn holder(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Remove a stale lock file during recovery, regardless of owner.
pub(crate) fn remove_stale(path: &Path) -> io::Result<bool> {
    if path.exists() {
        fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_file(dir: &TempDir) -> PathBuf {
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(&git_dir).unwrap();
        git_dir.join("gittx-write.lock")
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = lock_file(&dir);

        acquire(path.clone(), "tx1".to_string()).await.unwrap();
        assert_eq!(holder(&path), Some("tx1".to_string()));

        release(path.clone(), "tx1".to_string()).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_contention_reports_holder() {
        let dir = TempDir::new().unwrap();
        let path = lock_file(&dir);

        acquire(path.clone(), "tx1".to_string()).await.unwrap();

        let err = acquire(path.clone(), "tx2".to_string()).await.unwrap_err();
        match err {
            WriteLockError::Held { holder } => assert_eq!(holder, "tx1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_release_without_lock_is_quiet() {
        let dir = TempDir::new().unwrap();
        let path = lock_file(&dir);
        release(path, "tx1".to_string()).await;
    }

    #[test]
    fn test_remove_stale() {
        let dir = TempDir::new().unwrap();
        let path = lock_file(&dir);

        assert!(!remove_stale(&path).unwrap());
        fs::write(&path, "tx1").unwrap();
        assert!(remove_stale(&path).unwrap());
        assert!(!path.exists());
    }
}
