//! Transaction manager: the entry point for beginning and recovering
//! transactions.
//!
//! The manager owns the layer configuration and the in-process registry of
//! active transactions, and hands both to every transaction it creates.
//! Clone it to share across tasks; it uses Arc internally.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LayerConfig;
use crate::repo::{new_transaction_id, timestamp_now, BranchName, GitRepository, RepositoryError};
use crate::transaction::error::{TransactionError, TransactionResult, TransactionStateError};
use crate::transaction::registry::ActiveTransactions;
use crate::transaction::transaction::Transaction;

/// Future returned by a scoped-transaction closure.
pub type ScopedFuture<'a, T> =
    Pin<Box<dyn Future<Output = TransactionResult<T>> + Send + 'a>>;

/// Coordinates transaction creation, recovery, and scoped execution.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: LayerConfig,
    registry: ActiveTransactions,
}

impl TransactionManager {
    /// Create a manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(LayerConfig::default())
    }

    /// Create a manager with explicit configuration.
    pub fn with_config(config: LayerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                registry: ActiveTransactions::new(),
            }),
        }
    }

    /// The in-process registry of active transactions.
    pub fn registry(&self) -> &ActiveTransactions {
        &self.inner.registry
    }

    pub fn config(&self) -> &LayerConfig {
        &self.inner.config
    }

    /// Begin a new transaction against the repository at `path`.
    ///
    /// Opens (or creates) the repository, rejects a nested begin while
    /// another transaction is active on the same path, requires a clean
    /// working tree, and creates the transaction branch. The returned
    /// transaction is active and initially read-only.
    pub async fn begin(
        &self,
        path: impl Into<PathBuf>,
        message: Option<&str>,
    ) -> TransactionResult<Transaction> {
        let origin = GitRepository::open(path.into(), self.inner.config.clone())
            .await
            .map_err(TransactionError::Begin)?;

        let id = new_transaction_id();
        let timestamp = timestamp_now();
        let branch = BranchName::for_transaction(&id, &timestamp);
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Transaction {id}"));

        if let Err(active_id) = self.inner.registry.register(origin.path(), &id) {
            return Err(TransactionStateError::NestedTransaction {
                path: origin.path().to_path_buf(),
                active_id,
            }
            .into());
        }

        // The registry slot is reserved; give it back on any failure below.
        let started: Result<(), RepositoryError> = async {
            origin.ensure_clean().await?;
            origin.create_branch(&branch).await?;
            Ok(())
        }
        .await;
        if let Err(source) = started {
            self.inner.registry.release(origin.path(), &id);
            return Err(TransactionError::Begin(source));
        }

        info!(tx_id = %id, path = %origin.path().display(), "transaction started");
        Ok(Transaction::new(
            origin,
            self.inner.registry.clone(),
            id,
            timestamp,
            branch,
            message,
        ))
    }

    /// Recover the repository at `path` to a clean state.
    ///
    /// Idempotent. Removes stale locks, resets to `main`, reaps stale
    /// transaction branches and clears this process's registry entry for the
    /// path. The repair path for transactions abandoned by process death.
    /// Returns the number of stale branches deleted.
    pub async fn recover(&self, path: impl Into<PathBuf>) -> TransactionResult<usize> {
        let origin = GitRepository::open(path.into(), self.inner.config.clone()).await?;
        let deleted = origin.recover_to_clean_state().await?;
        self.inner.registry.clear(origin.path());
        info!(path = %origin.path().display(), "repository recovered");
        Ok(deleted)
    }

    /// Execute `f` within a transaction, committing on success and rolling
    /// back on error.
    ///
    /// If the commit itself fails, the transaction is rolled back and the
    /// commit error is surfaced; normal exit paths never leave a transaction
    /// dangling.
    pub async fn with_transaction<T, F>(
        &self,
        path: impl Into<PathBuf>,
        message: Option<&str>,
        f: F,
    ) -> TransactionResult<T>
    where
        F: for<'a> FnOnce(&'a mut Transaction) -> ScopedFuture<'a, T>,
    {
        let mut tx = self.begin(path, message).await?;
        match f(&mut tx).await {
            Ok(value) => {
                if let Err(commit_err) = tx.commit().await {
                    warn!(tx_id = %tx.id(), "commit failed, rolling back: {commit_err}");
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(tx_id = %tx.id(), "rollback after failed commit also failed: {rollback_err}");
                    }
                    return Err(commit_err);
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(tx_id = %tx.id(), "rollback failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.inner.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_begin_commit_durable() {
        let dir = TempDir::new().unwrap();
        let manager = TransactionManager::new();

        let mut tx = manager.begin(dir.path(), Some("write data")).await.unwrap();
        tx.write_escalation_required().await.unwrap();
        fs::write(tx.path().join("users.yaml"), "name: A\n").unwrap();
        tx.commit().await.unwrap();
        assert!(manager.registry().is_empty());

        let tx2 = manager.begin(dir.path(), None).await.unwrap();
        let content = fs::read_to_string(tx2.path().join("users.yaml")).unwrap();
        assert_eq!(content, "name: A\n");
        drop(tx2);
    }

    #[tokio::test]
    async fn test_nested_begin_rejected_until_terminal() {
        let dir = TempDir::new().unwrap();
        let manager = TransactionManager::new();

        let mut tx = manager.begin(dir.path(), None).await.unwrap();
        let err = manager.begin(dir.path(), None).await.unwrap_err();
        assert!(matches!(
            err,
            TransactionError::State(TransactionStateError::NestedTransaction { .. })
        ));

        tx.rollback().await.unwrap();
        let mut tx2 = manager.begin(dir.path(), None).await.unwrap();
        tx2.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_with_transaction_commits_on_ok() {
        let dir = TempDir::new().unwrap();
        let manager = TransactionManager::new();

        manager
            .with_transaction(dir.path(), Some("scoped write"), |tx| {
                Box::pin(async move {
                    tx.write_escalation_required().await?;
                    fs::write(tx.path().join("data.yaml"), "key: value\n")
                        .map_err(|e| TransactionError::WriteLock(e.to_string()))?;
                    tx.operation_complete("wrote data.yaml").await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let tx = manager.begin(dir.path(), None).await.unwrap();
        assert!(tx.path().join("data.yaml").exists());
        drop(tx);
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let manager = TransactionManager::new();

        let result: TransactionResult<()> = manager
            .with_transaction(dir.path(), None, |tx| {
                Box::pin(async move {
                    tx.write_escalation_required().await?;
                    fs::write(tx.path().join("data.yaml"), "partial\n")
                        .map_err(|e| TransactionError::WriteLock(e.to_string()))?;
                    Err(TransactionError::WriteLock("simulated failure".to_string()))
                })
            })
            .await;
        assert!(result.is_err());

        let tx = manager.begin(dir.path(), None).await.unwrap();
        assert!(!tx.path().join("data.yaml").exists());
        drop(tx);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_recover_clears_registry_entry() {
        let dir = TempDir::new().unwrap();
        let manager = TransactionManager::new();

        let tx = manager.begin(dir.path(), None).await.unwrap();
        // simulate a crash: the transaction is never terminated and its
        // Drop never runs
        std::mem::forget(tx);
        assert_eq!(manager.registry().len(), 1);

        manager.recover(dir.path()).await.unwrap();
        assert!(manager.registry().is_empty());

        let mut tx = manager.begin(dir.path(), None).await.unwrap();
        tx.commit().await.unwrap();
    }
}
