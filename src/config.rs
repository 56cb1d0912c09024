//! Configuration for the transaction layer.
//!
//! A [`LayerConfig`] is built once and handed to the [`TransactionManager`];
//! every repository and transaction it creates inherits the same settings.
//!
//! [`TransactionManager`]: crate::transaction::TransactionManager

use chrono::Duration;

/// Settings shared by all repositories and transactions of a manager.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Author name written into repo-local `user.name` at open time.
    pub author_name: String,
    /// Author email written into repo-local `user.email` at open time.
    pub author_email: String,
    /// File name of the write-lock marker inside `.git/`.
    pub write_lock_file: String,
    /// Prefix of temporary workspace clone directories.
    pub temp_clone_prefix: String,
    /// How long stale transaction branches are kept before recovery deletes them.
    pub branch_retention: Duration,
}

impl LayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    pub fn with_write_lock_file(mut self, name: impl Into<String>) -> Self {
        self.write_lock_file = name.into();
        self
    }

    pub fn with_temp_clone_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_clone_prefix = prefix.into();
        self
    }

    pub fn with_branch_retention(mut self, retention: Duration) -> Self {
        self.branch_retention = retention;
        self
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            author_name: "gittx".to_string(),
            author_email: "gittx@localhost".to_string(),
            write_lock_file: "gittx-write.lock".to_string(),
            temp_clone_prefix: "gittx-".to_string(),
            branch_retention: Duration::hours(24),
        }
    }
}
