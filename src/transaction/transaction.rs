//! The transaction state machine.
//!
//! A [`Transaction`] owns one branch on the origin repository and, once
//! write-escalated, an ephemeral workspace clone where all file mutation
//! happens. Commit transplants the workspace branch back into origin and
//! merges it into `main`; rollback abandons the branch and resets origin.
//!
//! Lifecycle: `Active -> Committed | RolledBack`. Terminal states reject
//! every further operation except `rollback`, which becomes a no-op.

use std::fmt;
use std::path::Path;

use tracing::{error, info, warn};

use crate::repo::lock::{self, WriteLockError};
use crate::repo::{BranchName, GitRepository};
use crate::transaction::error::{TransactionError, TransactionResult, TransactionStateError};
use crate::transaction::registry::ActiveTransactions;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// A transaction against one repository.
///
/// Created by [`TransactionManager::begin`]; callers read and write plain
/// files under [`Transaction::path`] with no Git awareness, bracketed by
/// [`write_escalation_required`] before the first mutation and
/// [`commit`]/[`rollback`] at the end.
///
/// [`TransactionManager::begin`]: crate::transaction::TransactionManager::begin
/// [`write_escalation_required`]: Transaction::write_escalation_required
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
pub struct Transaction {
    id: String,
    timestamp: String,
    branch: BranchName,
    message: String,
    state: TxState,
    escalated: bool,
    origin: GitRepository,
    workspace: Option<GitRepository>,
    registry: ActiveTransactions,
}

impl Transaction {
    pub(crate) fn new(
        origin: GitRepository,
        registry: ActiveTransactions,
        id: String,
        timestamp: String,
        branch: BranchName,
        message: String,
    ) -> Self {
        Self {
            id,
            timestamp,
            branch,
            message,
            state: TxState::Active,
            escalated: false,
            origin,
            workspace: None,
            registry,
        }
    }

    /// The transaction id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The transaction's branch on origin.
    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    /// The human message given at `begin`.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    pub fn is_write_escalated(&self) -> bool {
        self.escalated
    }

    /// The filesystem surface exposed to callers: the workspace clone's path
    /// once escalated, the origin path otherwise.
    pub fn path(&self) -> &Path {
        match &self.workspace {
            Some(workspace) => workspace.path(),
            None => self.origin.path(),
        }
    }

    fn ensure_active(&self) -> Result<(), TransactionStateError> {
        match self.state {
            TxState::Active => Ok(()),
            state => Err(TransactionStateError::NotActive {
                tx_id: self.id.clone(),
                state: state.to_string(),
            }),
        }
    }

    /// Signal that write operations are about to occur.
    ///
    /// Idempotent. The first call acquires the write lock, clones origin
    /// into a temporary workspace and checks out the transaction branch
    /// there; afterwards [`path`](Transaction::path) resolves to the clone.
    /// Not calling this before mutating files is a caller bug; the engine
    /// does not auto-detect writes.
    pub async fn write_escalation_required(&mut self) -> TransactionResult<()> {
        self.ensure_active()?;
        if self.escalated {
            return Ok(());
        }

        let lock_path = self.origin.write_lock_path();
        lock::acquire(lock_path.clone(), self.id.clone())
            .await
            .map_err(|e| match e {
                WriteLockError::Held { holder } => TransactionError::WriteLockHeld { holder },
                other => TransactionError::WriteLock(other.to_string()),
            })?;

        info!(tx_id = %self.id, "escalating transaction to write mode");

        let workspace = match self.origin.clone_to_temp().await {
            Ok(workspace) => workspace,
            Err(source) => {
                lock::release(lock_path, self.id.clone()).await;
                return Err(TransactionError::Escalation {
                    tx_id: self.id.clone(),
                    source,
                });
            }
        };
        if let Err(source) = workspace.checkout_branch(&self.branch).await {
            workspace.cleanup_clone().await;
            lock::release(lock_path, self.id.clone()).await;
            return Err(TransactionError::Escalation {
                tx_id: self.id.clone(),
                source,
            });
        }

        self.workspace = Some(workspace);
        self.escalated = true;
        Ok(())
    }

    /// Commit the current workspace state as an intermediate point.
    ///
    /// No-op when the transaction never escalated. Back-to-back calls with
    /// no intervening change squash into one commit because `commit_all` is
    /// idempotent.
    pub async fn checkpoint(&mut self, message: Option<&str>) -> TransactionResult<()> {
        self.ensure_active()?;
        let Some(workspace) = self.workspace.clone() else {
            return Ok(());
        };
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Transaction {}: checkpoint", self.id));
        workspace
            .commit_all(message)
            .await
            .map_err(|source| TransactionError::Checkpoint {
                tx_id: self.id.clone(),
                source,
            })?;
        Ok(())
    }

    /// Signal that one logical operation finished.
    ///
    /// One commit per operation, so the merged ancestry on `main` shows
    /// per-operation granularity.
    pub async fn operation_complete(&mut self, message: &str) -> TransactionResult<()> {
        self.checkpoint(Some(message)).await
    }

    /// Signal that an operation failed, capturing forensic state.
    ///
    /// Commits the current, possibly partial, workspace state and
    /// transplants it to origin under a dedicated failure branch; with no
    /// escalation an empty failure branch is still created from origin HEAD
    /// so failures are always visible. The transaction stays active: the
    /// caller decides whether to roll back or continue. Forensic capture is
    /// best-effort and never fails the call; returns the failure branch name
    /// for error reporting.
    pub async fn operation_failed(&mut self, error_message: &str) -> TransactionResult<BranchName> {
        self.ensure_active()?;
        let failure_branch = BranchName::for_failure(&self.timestamp, &self.id);

        if let Some(workspace) = self.workspace.clone() {
            match workspace
                .commit_all(format!("Failed operation: {error_message}"))
                .await
            {
                Err(e) => warn!(tx_id = %self.id, "could not commit failure state: {e}"),
                Ok(_) => {
                    match self
                        .origin
                        .transplant_branch(&workspace, &self.branch, &failure_branch)
                        .await
                    {
                        Ok(()) => info!(branch = %failure_branch, "created failure branch"),
                        Err(e) => warn!(tx_id = %self.id, "could not create failure branch: {e}"),
                    }
                }
            }
        } else {
            match self.origin.create_branch(&failure_branch).await {
                Ok(()) => info!(branch = %failure_branch, "created failure branch (no writes)"),
                Err(e) => warn!(tx_id = %self.id, "could not create failure branch: {e}"),
            }
        }

        Ok(failure_branch)
    }

    /// Commit the transaction, making its writes visible on `main`.
    ///
    /// Escalated: final checkpoint, transplant the transaction branch into
    /// origin, merge it into `main`, release the write lock, discard the
    /// clone. Never escalated: nothing to merge. Either way the transaction
    /// branch is deleted from origin and the transaction becomes terminal.
    ///
    /// On failure the transaction stays active, so `rollback` remains safe
    /// to call.
    pub async fn commit(&mut self) -> TransactionResult<()> {
        match self.state {
            TxState::Active => {}
            TxState::Committed => {
                return Err(TransactionStateError::AlreadyCommitted {
                    tx_id: self.id.clone(),
                }
                .into())
            }
            TxState::RolledBack => {
                return Err(TransactionStateError::NotActive {
                    tx_id: self.id.clone(),
                    state: TxState::RolledBack.to_string(),
                }
                .into())
            }
        }

        if let Some(workspace) = self.workspace.clone() {
            let commit_err = |tx_id: &str| {
                let tx_id = tx_id.to_string();
                move |source| TransactionError::Commit { tx_id, source }
            };

            workspace
                .commit_all("Final checkpoint before merge")
                .await
                .map_err(commit_err(&self.id))?;
            self.origin
                .transplant_branch(&workspace, &self.branch, &self.branch)
                .await
                .map_err(commit_err(&self.id))?;
            let merge_message = format!("Transaction {}: {}", self.id, self.message);
            self.origin
                .merge_branch(&self.branch, merge_message)
                .await
                .map_err(commit_err(&self.id))?;

            lock::release(self.origin.write_lock_path(), self.id.clone()).await;
            workspace.cleanup_clone().await;
            self.workspace = None;
        } else {
            info!(tx_id = %self.id, "no writes in transaction, skipping merge");
        }

        self.origin.delete_branch(&self.branch).await;
        self.state = TxState::Committed;
        self.registry.release(self.origin.path(), &self.id);
        info!(tx_id = %self.id, "transaction committed");
        Ok(())
    }

    /// Roll back the transaction, restoring origin to `main`.
    ///
    /// Safe to call repeatedly; a no-op once the transaction is terminal.
    /// Escalated state is first captured back onto the transaction branch
    /// (best-effort, for inspection), which is deliberately left on origin.
    pub async fn rollback(&mut self) -> TransactionResult<()> {
        if self.state != TxState::Active {
            return Ok(());
        }

        if let Some(workspace) = self.workspace.clone() {
            match workspace
                .commit_all(format!("Transaction {}: rollback checkpoint", self.id))
                .await
            {
                Err(e) => warn!(tx_id = %self.id, "could not create rollback checkpoint: {e}"),
                Ok(_) => {
                    if let Err(e) = self
                        .origin
                        .transplant_branch(&workspace, &self.branch, &self.branch)
                        .await
                    {
                        warn!(tx_id = %self.id, "could not push rollback state to origin: {e}");
                    }
                }
            }
            workspace.cleanup_clone().await;
            self.workspace = None;
            lock::release(self.origin.write_lock_path(), self.id.clone()).await;
            self.escalated = false;
        }

        if let Err(source) = self.origin.reset_to_main().await {
            error!(tx_id = %self.id, "rollback failed to reset origin: {source}");
            return Err(TransactionError::Rollback {
                tx_id: self.id.clone(),
                source,
            });
        }

        self.state = TxState::RolledBack;
        self.registry.release(self.origin.path(), &self.id);
        info!(tx_id = %self.id, "transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    /// Diagnostic only. A transaction abandoned while active is logged and
    /// unregistered, but the repository itself is only repaired by an
    /// explicit `recover` call.
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!(
                tx_id = %self.id,
                "transaction dropped while active; run recover() to restore the repository"
            );
            self.registry.release(self.origin.path(), &self.id);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("branch", &self.branch)
            .field("state", &self.state)
            .field("escalated", &self.escalated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use crate::repo::{new_transaction_id, timestamp_now};
    use std::fs;
    use tempfile::TempDir;

    async fn begin_raw(dir: &TempDir) -> (Transaction, GitRepository) {
        let origin = GitRepository::open(dir.path(), LayerConfig::default())
            .await
            .unwrap();
        let id = new_transaction_id();
        let timestamp = timestamp_now();
        let branch = BranchName::for_transaction(&id, &timestamp);
        origin.create_branch(&branch).await.unwrap();
        let registry = ActiveTransactions::new();
        registry.register(origin.path(), &id).unwrap();
        let tx = Transaction::new(
            origin.clone(),
            registry,
            id,
            timestamp,
            branch,
            "test".to_string(),
        );
        (tx, origin)
    }

    #[tokio::test]
    async fn test_checkpoint_without_escalation_is_noop() {
        let dir = TempDir::new().unwrap();
        let (mut tx, origin) = begin_raw(&dir).await;

        let head = origin.head().await.unwrap();
        tx.checkpoint(Some("nothing yet")).await.unwrap();
        assert_eq!(origin.head().await.unwrap(), head);

        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_escalation_is_idempotent_and_locks() {
        let dir = TempDir::new().unwrap();
        let (mut tx, origin) = begin_raw(&dir).await;

        tx.write_escalation_required().await.unwrap();
        assert!(tx.is_write_escalated());
        let workspace_path = tx.path().to_path_buf();
        assert_ne!(workspace_path, origin.path());
        assert_eq!(origin.write_lock_holder(), Some(tx.id().to_string()));

        // second call keeps the same workspace
        tx.write_escalation_required().await.unwrap();
        assert_eq!(tx.path(), workspace_path);

        tx.rollback().await.unwrap();
        assert!(origin.write_lock_holder().is_none());
        assert!(!workspace_path.exists());
    }

    #[tokio::test]
    async fn test_commit_twice_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (mut tx, _origin) = begin_raw(&dir).await;

        tx.commit().await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            TransactionError::State(TransactionStateError::AlreadyCommitted { .. })
        ));
    }

    #[tokio::test]
    async fn test_rollback_is_repeatable() {
        let dir = TempDir::new().unwrap();
        let (mut tx, _origin) = begin_raw(&dir).await;

        tx.rollback().await.unwrap();
        assert!(!tx.is_active());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_operations_after_terminal_state_fail() {
        let dir = TempDir::new().unwrap();
        let (mut tx, _origin) = begin_raw(&dir).await;
        tx.rollback().await.unwrap();

        let err = tx.write_escalation_required().await.unwrap_err();
        assert!(matches!(
            err,
            TransactionError::State(TransactionStateError::NotActive { .. })
        ));
        let err = tx.checkpoint(None).await.unwrap_err();
        assert!(matches!(err, TransactionError::State(_)));
        let err = tx.operation_failed("late").await.unwrap_err();
        assert!(matches!(err, TransactionError::State(_)));
    }

    #[tokio::test]
    async fn test_commit_deletes_transaction_branch() {
        let dir = TempDir::new().unwrap();
        let (mut tx, origin) = begin_raw(&dir).await;
        let branch = tx.branch().clone();

        tx.write_escalation_required().await.unwrap();
        fs::write(tx.path().join("data.yaml"), "key: value\n").unwrap();
        tx.commit().await.unwrap();

        assert!(!origin.branch_exists(&branch).await.unwrap());
        assert!(origin.path().join("data.yaml").exists());
    }

    #[tokio::test]
    async fn test_rollback_keeps_transaction_branch() {
        let dir = TempDir::new().unwrap();
        let (mut tx, origin) = begin_raw(&dir).await;
        let branch = tx.branch().clone();

        tx.write_escalation_required().await.unwrap();
        fs::write(tx.path().join("data.yaml"), "key: value\n").unwrap();
        tx.rollback().await.unwrap();

        // abandoned state stays on the branch for inspection
        assert!(origin.branch_exists(&branch).await.unwrap());
        assert!(!origin.path().join("data.yaml").exists());
    }

    #[tokio::test]
    async fn test_operation_failed_keeps_transaction_active() {
        let dir = TempDir::new().unwrap();
        let (mut tx, origin) = begin_raw(&dir).await;

        let failure_branch = tx.operation_failed("validation rejected row").await.unwrap();
        assert!(tx.is_active());
        assert!(failure_branch.is_failure_branch());
        assert!(origin.branch_exists(&failure_branch).await.unwrap());

        tx.rollback().await.unwrap();
    }
}
