//! Transaction error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::repo::RepositoryError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// The transaction was used outside a valid state.
///
/// These are caller bugs, not environmental failures: operating on a
/// terminal transaction, or beginning a second transaction on a path that
/// already has one.
#[derive(Debug, Error)]
pub enum TransactionStateError {
    /// A transaction is already active for this repository path.
    #[error(
        "transaction {active_id} already active on {}; nested transactions are not allowed",
        .path.display()
    )]
    NestedTransaction { path: PathBuf, active_id: String },

    /// The transaction has already committed.
    #[error("transaction {tx_id} already committed")]
    AlreadyCommitted { tx_id: String },

    /// The transaction is in a terminal state.
    #[error("transaction {tx_id} is no longer active (state: {state})")]
    NotActive { tx_id: String, state: String },
}

/// Errors that can occur during transaction lifecycle operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Misuse of the transaction state machine.
    #[error(transparent)]
    State(#[from] TransactionStateError),

    /// The transaction could not be started.
    #[error("failed to begin transaction")]
    Begin(#[source] RepositoryError),

    /// Another transaction holds the write lock.
    #[error("another write transaction in progress (held by {holder})")]
    WriteLockHeld { holder: String },

    /// The write lock could not be acquired for a non-contention reason.
    #[error("failed to acquire write lock: {0}")]
    WriteLock(String),

    /// Write escalation failed after the lock was acquired.
    #[error("failed to escalate transaction {tx_id} to write mode")]
    Escalation {
        tx_id: String,
        #[source]
        source: RepositoryError,
    },

    /// A checkpoint commit failed.
    #[error("failed to create checkpoint for transaction {tx_id}")]
    Checkpoint {
        tx_id: String,
        #[source]
        source: RepositoryError,
    },

    /// Commit failed; the transaction is still active and can be rolled back.
    #[error("failed to commit transaction {tx_id}")]
    Commit {
        tx_id: String,
        #[source]
        source: RepositoryError,
    },

    /// Rollback failed; the transaction is still active and rollback can be
    /// retried, or the repository recovered explicitly.
    #[error("failed to roll back transaction {tx_id}")]
    Rollback {
        tx_id: String,
        #[source]
        source: RepositoryError,
    },

    /// A repository operation failed outside a more specific phase.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_transaction_message() {
        let err = TransactionStateError::NestedTransaction {
            path: PathBuf::from("/data/repo"),
            active_id: "abc12345".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("nested transactions are not allowed"));
        assert!(msg.contains("abc12345"));
    }

    #[test]
    fn test_lock_contention_message() {
        let err = TransactionError::WriteLockHeld {
            holder: "abc12345".to_string(),
        };
        assert!(err
            .to_string()
            .contains("another write transaction in progress"));
    }
}
