//! gittx - database-style transactions for file trees, backed by Git.
//!
//! This crate gives a shared, file-tree-based data store BEGIN/COMMIT/
//! ROLLBACK semantics with crash recovery and single-writer concurrency
//! control, using Git objects and branches as the durable log.
//!
//! A transaction starts read-only against the origin repository. Before the
//! first mutation the caller escalates to write mode, which clones origin
//! into a temporary workspace; all file I/O then happens inside that clone,
//! invisible to other readers. Commit transplants the workspace branch back
//! into origin and merges it into `main`, making the writes visible
//! atomically; rollback abandons the branch and resets origin. Failed
//! operations can be captured on dedicated forensic branches without ending
//! the transaction, and a repository left behind by a crashed process is
//! repaired with an explicit `recover` call.
//!
//! # Example
//!
//! ```no_run
//! use gittx::TransactionManager;
//!
//! # async fn example() -> gittx::TransactionResult<()> {
//! let manager = TransactionManager::new();
//!
//! let mut tx = manager.begin("/data/store", Some("update users")).await?;
//! tx.write_escalation_required().await?;
//! std::fs::write(tx.path().join("users.yaml"), "name: A\n").unwrap();
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Concurrency: one active transaction per repository path per process
//! (enforced by the manager's registry), one escalated writer per repository
//! across processes (enforced by a lock file inside `.git/`). Reads never
//! take the lock and are always concurrent-safe.

pub mod config;
pub mod repo;
pub mod transaction;

pub use config::LayerConfig;
pub use repo::{BranchName, CommitId, GitOperationError, GitRepository, RepositoryError};
pub use transaction::{
    Transaction, TransactionError, TransactionManager, TransactionResult,
    TransactionStateError, TxState,
};
