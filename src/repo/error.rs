//! Repository layer error types.
//!
//! All errors that can occur while driving the underlying Git engine are
//! defined here. We use `thiserror` for ergonomic error definition.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for repository operations.
pub type RepoResult<T> = Result<T, RepositoryError>;

/// A single Git plumbing call failed.
///
/// Wraps the underlying `git2` error together with the name of the
/// operation that was being attempted.
#[derive(Debug, Error)]
#[error("git {operation} failed")]
pub struct GitOperationError {
    operation: String,
    #[source]
    source: git2::Error,
}

impl GitOperationError {
    pub fn new(operation: impl Into<String>, source: git2::Error) -> Self {
        Self {
            operation: operation.into(),
            source,
        }
    }

    /// The plumbing operation that failed (e.g. `"create branch"`).
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// The main error type for repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Repository could not be created or opened.
    #[error("failed to initialize repository at {}", .path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// The working tree has uncommitted or untracked content.
    #[error(
        "working tree at {} has uncommitted changes; \
         commit or discard them before starting a transaction",
        .0.display()
    )]
    DirtyWorkingTree(PathBuf),

    /// The `main` branch does not exist and cannot be restored.
    #[error("main branch does not exist in {}", .0.display())]
    MainBranchMissing(PathBuf),

    /// Merging a transaction branch into `main` produced conflicts.
    #[error("merge of {branch} into main produced conflicts: {}", .paths.join(", "))]
    MergeConflict { branch: String, paths: Vec<String> },

    /// A plumbing call failed.
    #[error(transparent)]
    Git(#[from] GitOperationError),

    /// Filesystem-level failure.
    #[error("io error during {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// A blocking Git task could not be joined (panicked or was cancelled).
    #[error("background git task failed: {0}")]
    Task(String),
}

impl RepositoryError {
    /// Check if this error is a merge conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::MergeConflict { .. })
    }
}

/// Shorthand for mapping a `git2::Error` into a named [`GitOperationError`].
pub(crate) fn git_op(operation: &'static str) -> impl FnOnce(git2::Error) -> RepositoryError {
    move |source| RepositoryError::Git(GitOperationError::new(operation, source))
}

/// Shorthand for mapping an `io::Error` into [`RepositoryError::Io`].
pub(crate) fn io_op(operation: &'static str) -> impl FnOnce(std::io::Error) -> RepositoryError {
    move |source| RepositoryError::Io {
        operation: operation.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_operation_error_display() {
        let err = GitOperationError::new("merge", git2::Error::from_str("boom"));
        assert_eq!(err.to_string(), "git merge failed");
        assert_eq!(err.operation(), "merge");
    }

    #[test]
    fn test_conflict_classification() {
        let conflict = RepositoryError::MergeConflict {
            branch: "transaction-abc".to_string(),
            paths: vec!["users.yaml".to_string()],
        };
        assert!(conflict.is_conflict());
        assert!(conflict.to_string().contains("users.yaml"));

        let dirty = RepositoryError::DirtyWorkingTree(PathBuf::from("/tmp/x"));
        assert!(!dirty.is_conflict());
    }
}
