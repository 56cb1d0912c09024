//! Repository layer.
//!
//! This module wraps one Git repository directory and exposes the
//! primitives the transaction coordinator is built from:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GitRepository                          │
//! │  (branches, commit-all, merge, reset, clones, recovery)     │
//! └─────────────────────────────────────────────────────────────┘
//!               │                  │                  │
//!               ▼                  ▼                  ▼
//!        ┌────────────┐     ┌────────────┐     ┌────────────┐
//!        │   types    │     │    lock    │     │   error    │
//!        │ (naming)   │     │ (writers)  │     │ (taxonomy) │
//!        └────────────┘     └────────────┘     └────────────┘
//! ```
//!
//! The invariant the whole layer maintains: a branch named `main` always
//! exists and represents the last fully-committed, consistent state; its
//! working tree is clean except while a transaction is actively escalated.

mod error;
pub(crate) mod lock;
mod repository;
mod types;

pub use error::{GitOperationError, RepoResult, RepositoryError};
pub use lock::WriteLockError;
pub use repository::GitRepository;
pub use types::{new_transaction_id, timestamp_now, BranchName, CommitId};
