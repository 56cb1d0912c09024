//! In-process registry of active transactions.
//!
//! One entry per repository path, used only to reject a second `begin` while
//! a transaction is already active there. The registry is owned by the
//! [`TransactionManager`] and injected into every transaction it creates, so
//! its lifetime and test isolation stay explicit; it is never a module-level
//! global.
//!
//! [`TransactionManager`]: crate::transaction::TransactionManager

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Process-wide map from repository path to the id of its active transaction.
///
/// Clone to share; uses Arc internally.
#[derive(Clone, Default)]
pub struct ActiveTransactions {
    inner: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl ActiveTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically register `tx_id` as the active transaction for `path`.
    ///
    /// Returns the id of the already-registered transaction on conflict.
    pub fn register(&self, path: &Path, tx_id: &str) -> Result<(), String> {
        let mut map = self.inner.lock();
        if let Some(active) = map.get(path) {
            return Err(active.clone());
        }
        map.insert(path.to_path_buf(), tx_id.to_string());
        debug!(path = %path.display(), tx_id, "registered active transaction");
        Ok(())
    }

    /// Remove the entry for `path`, but only if it belongs to `tx_id`.
    ///
    /// Guards against a late release clobbering a newer transaction's entry.
    pub fn release(&self, path: &Path, tx_id: &str) {
        let mut map = self.inner.lock();
        if map.get(path).is_some_and(|active| active == tx_id) {
            map.remove(path);
            debug!(path = %path.display(), tx_id, "released active transaction");
        }
    }

    /// Drop whatever entry exists for `path`. Used by recovery.
    pub fn clear(&self, path: &Path) {
        if self.inner.lock().remove(path).is_some() {
            debug!(path = %path.display(), "cleared stale transaction entry");
        }
    }

    /// Id of the transaction currently registered for `path`, if any.
    pub fn active(&self, path: &Path) -> Option<String> {
        self.inner.lock().get(path).cloned()
    }

    /// Number of registered transactions.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let registry = ActiveTransactions::new();
        let path = Path::new("/data/repo");

        registry.register(path, "tx1").unwrap();
        assert_eq!(registry.active(path), Some("tx1".to_string()));

        registry.release(path, "tx1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_second_register_rejected() {
        let registry = ActiveTransactions::new();
        let path = Path::new("/data/repo");

        registry.register(path, "tx1").unwrap();
        let err = registry.register(path, "tx2").unwrap_err();
        assert_eq!(err, "tx1");

        // different path is independent
        registry.register(Path::new("/data/other"), "tx2").unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_requires_matching_id() {
        let registry = ActiveTransactions::new();
        let path = Path::new("/data/repo");

        registry.register(path, "tx1").unwrap();
        registry.release(path, "tx2");
        assert_eq!(registry.active(path), Some("tx1".to_string()));
    }

    #[test]
    fn test_clear_ignores_owner() {
        let registry = ActiveTransactions::new();
        let path = Path::new("/data/repo");

        registry.register(path, "tx1").unwrap();
        registry.clear(path);
        assert!(registry.is_empty());

        // clearing an absent path is fine
        registry.clear(path);
    }
}
