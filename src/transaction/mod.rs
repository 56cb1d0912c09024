//! Transaction coordination.
//!
//! This module implements BEGIN/COMMIT/ROLLBACK over the repository layer.
//! Each transaction gets its own branch on origin; write escalation
//! materializes an isolated workspace clone where all file I/O happens, and
//! commit transplants the workspace history back and merges it into `main`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TransactionManager                       │
//! │     (begin / recover / scoped execution, owns registry)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌────────────┐  ┌────────────┐  ┌────────────┐
//!        │Transaction │  │  registry  │  │   error    │
//!        │ (lifecycle)│  │ (nesting)  │  │ (taxonomy) │
//!        └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use gittx::transaction::TransactionManager;
//!
//! # async fn example() -> gittx::transaction::TransactionResult<()> {
//! let manager = TransactionManager::new();
//!
//! let mut tx = manager.begin("/data/store", Some("update users")).await?;
//! tx.write_escalation_required().await?;
//! std::fs::write(tx.path().join("users.yaml"), "name: A\n").unwrap();
//! tx.operation_complete("wrote users.yaml").await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod manager;
mod registry;
mod transaction;

pub use error::{TransactionError, TransactionResult, TransactionStateError};
pub use manager::{ScopedFuture, TransactionManager};
pub use registry::ActiveTransactions;
pub use transaction::{Transaction, TxState};
