//! Type-safe wrappers around Git primitives plus the branch-naming convention.

use std::fmt;

use chrono::Utc;
use git2::Oid;
use ulid::Ulid;

/// A commit identifier.
///
/// This makes sure we don't accidentally pass an arbitrary Oid where a
/// commit is expected. The inner Oid is only accessible within the repo
/// module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// Short form of the commit id.
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A branch name, with special handling for transaction and failure branches.
///
/// In-flight transactions live on `transaction-<id>-<timestamp>`; forensic
/// state captured by a failed operation lands on
/// `failed-transaction-<timestamp>-<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    /// The main branch name.
    pub const MAIN: &'static str = "main";

    /// Prefix for in-flight transaction branches.
    pub const TRANSACTION_PREFIX: &'static str = "transaction-";

    /// Prefix for forensic failure branches.
    pub const FAILURE_PREFIX: &'static str = "failed-transaction-";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The `main` branch.
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// Branch for an in-flight transaction: `transaction-<id>-<timestamp>`.
    pub fn for_transaction(tx_id: &str, timestamp: &str) -> Self {
        Self(format!("{}{}-{}", Self::TRANSACTION_PREFIX, tx_id, timestamp))
    }

    /// Forensic branch for a failed operation:
    /// `failed-transaction-<timestamp>-<id>`.
    pub fn for_failure(timestamp: &str, tx_id: &str) -> Self {
        Self(format!("{}{}-{}", Self::FAILURE_PREFIX, timestamp, tx_id))
    }

    /// Check if this is an in-flight transaction branch.
    ///
    /// Failure branches are deliberately excluded; they carry their own
    /// prefix and are exempt from stale-branch cleanup.
    pub fn is_transaction_branch(&self) -> bool {
        self.0.starts_with(Self::TRANSACTION_PREFIX)
    }

    /// Check if this is a forensic failure branch.
    pub fn is_failure_branch(&self) -> bool {
        self.0.starts_with(Self::FAILURE_PREFIX)
    }

    /// The full ref path (e.g. `refs/heads/main`).
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generate a short random transaction id.
///
/// Eight lowercase characters taken from the random tail of a ULID.
pub fn new_transaction_id() -> String {
    let ulid = Ulid::new().to_string().to_lowercase();
    ulid[ulid.len() - 8..].to_string()
}

/// Timestamp used in branch names, second resolution.
pub fn timestamp_now() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_branch_name() {
        let branch = BranchName::for_transaction("abc12345", "20260823-120000");
        assert_eq!(branch.as_str(), "transaction-abc12345-20260823-120000");
        assert!(branch.is_transaction_branch());
        assert!(!branch.is_failure_branch());
        assert_eq!(
            branch.as_ref_path(),
            "refs/heads/transaction-abc12345-20260823-120000"
        );
    }

    #[test]
    fn test_failure_branch_name() {
        let branch = BranchName::for_failure("20260823-120000", "abc12345");
        assert_eq!(branch.as_str(), "failed-transaction-20260823-120000-abc12345");
        assert!(branch.is_failure_branch());
        // Failure branches must not count as in-flight transaction branches,
        // otherwise recovery would reap them.
        assert!(!branch.is_transaction_branch());
    }

    #[test]
    fn test_main_branch() {
        let branch = BranchName::main();
        assert_eq!(branch.as_str(), "main");
        assert!(!branch.is_transaction_branch());
        assert_eq!(branch.as_ref_path(), "refs/heads/main");
    }

    #[test]
    fn test_transaction_id_shape() {
        let id1 = new_transaction_id();
        let id2 = new_transaction_id();
        assert_eq!(id1.len(), 8);
        assert_ne!(id1, id2);
        assert!(id1.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_timestamp_shape() {
        let ts = timestamp_now();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "-");
    }
}
