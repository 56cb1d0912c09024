//! Core Git repository wrapper.
//!
//! This is the central component of the repository layer. It wraps
//! `git2::Repository` with thread-safe access and provides the high-level
//! primitives the transaction coordinator is built on: branch lifecycle,
//! commit-all, merge, reset, temporary clones, branch transplanting and
//! crash recovery.
//!
//! Every libgit2 call is blocking I/O, so all of them run on the tokio
//! blocking pool; the async methods here never block the caller's runtime.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{BranchType, IndexAddOption, Repository, ResetType, StatusOptions};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LayerConfig;
use crate::repo::error::{git_op, io_op, RepoResult, RepositoryError};
use crate::repo::lock;
use crate::repo::types::{BranchName, CommitId};

const GITIGNORE_CONTENT: &str = ".DS_Store\n*.tmp\n";

/// The main Git repository wrapper.
///
/// Clone this to share across tasks; it uses Arc internally. The inner
/// `git2::Repository` is guarded by a mutex because libgit2 handles are not
/// safe for concurrent use.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    config: LayerConfig,
}

impl GitRepository {
    /// Open the repository at `path`, initializing it if necessary.
    ///
    /// Idempotent. A fresh directory gets `git init`, a `.gitignore`, an
    /// initial commit and a `main` branch (renaming the default branch when
    /// the engine created something else). An existing repository is opened
    /// as-is, with user config and `main` ensured.
    pub async fn open(path: impl Into<PathBuf>, config: LayerConfig) -> RepoResult<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_blocking(&path, config))
            .await
            .map_err(|e| RepositoryError::Task(e.to_string()))?
    }

    fn open_blocking(path: &Path, config: LayerConfig) -> RepoResult<Self> {
        fs::create_dir_all(path).map_err(io_op("create repository directory"))?;
        let path = path
            .canonicalize()
            .map_err(io_op("canonicalize repository path"))?;

        let repo = if path.join(".git").exists() {
            Repository::open(&path).map_err(|source| RepositoryError::Init {
                path: path.clone(),
                source,
            })?
        } else {
            info!(path = %path.display(), "initializing repository");
            Repository::init(&path).map_err(|source| RepositoryError::Init {
                path: path.clone(),
                source,
            })?
        };

        ensure_user_config(&repo, &config).map_err(git_op("set user config"))?;

        if repo.is_empty().map_err(git_op("inspect repository"))? {
            create_initial_commit(&repo, &path)?;
        }
        ensure_main_branch(&repo, &path)?;

        Ok(Self::from_parts(repo, path, config))
    }

    fn from_parts(repo: Repository, path: PathBuf, config: LayerConfig) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path,
                config,
            }),
        }
    }

    /// The repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Path of this repository's write-lock marker file.
    pub(crate) fn write_lock_path(&self) -> PathBuf {
        lock::lock_path(&self.inner.path, &self.inner.config.write_lock_file)
    }

    /// Id of the transaction currently holding the write lock, if any.
    pub fn write_lock_holder(&self) -> Option<String> {
        lock::holder(&self.write_lock_path())
    }

    /// Run `f` with the repository handle on the blocking pool.
    async fn with_repo<T, F>(&self, f: F) -> RepoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> RepoResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let repo = inner.repo.lock();
            f(&repo)
        })
        .await
        .map_err(|e| RepositoryError::Task(e.to_string()))?
    }

    // ==================== Preconditions ====================

    /// Fail if the working tree has any uncommitted or untracked content.
    ///
    /// Guards `begin` against starting a transaction from an inconsistent
    /// state.
    pub async fn ensure_clean(&self) -> RepoResult<()> {
        let path = self.inner.path.clone();
        self.with_repo(move |repo| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true)
                .recurse_untracked_dirs(true)
                .include_ignored(false);
            let statuses = repo.statuses(Some(&mut opts)).map_err(git_op("status"))?;
            if statuses.is_empty() {
                Ok(())
            } else {
                Err(RepositoryError::DirtyWorkingTree(path))
            }
        })
        .await
    }

    // ==================== Branch Lifecycle ====================

    /// Create `branch` at the current HEAD.
    pub async fn create_branch(&self, branch: &BranchName) -> RepoResult<()> {
        let branch = branch.clone();
        self.with_repo(move |repo| {
            let head = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(git_op("resolve HEAD"))?;
            repo.branch(branch.as_str(), &head, false)
                .map_err(git_op("create branch"))?;
            info!(branch = %branch, "created branch");
            Ok(())
        })
        .await
    }

    /// Check out `branch`, updating HEAD and the working tree.
    pub async fn checkout_branch(&self, branch: &BranchName) -> RepoResult<()> {
        let branch = branch.clone();
        self.with_repo(move |repo| {
            let obj = repo
                .revparse_single(&branch.as_ref_path())
                .map_err(git_op("resolve branch"))?;
            let mut checkout = CheckoutBuilder::new();
            checkout.safe();
            repo.checkout_tree(&obj, Some(&mut checkout))
                .map_err(git_op("checkout tree"))?;
            repo.set_head(&branch.as_ref_path())
                .map_err(git_op("set HEAD"))?;
            debug!(branch = %branch, "checked out branch");
            Ok(())
        })
        .await
    }

    /// Delete `branch`. Best-effort: forensic and rollback branches must
    /// never block cleanup of the happy path, so failures are logged, not
    /// raised.
    pub async fn delete_branch(&self, branch: &BranchName) {
        let name = branch.clone();
        let result = self
            .with_repo(move |repo| {
                let mut branch = repo
                    .find_branch(name.as_str(), BranchType::Local)
                    .map_err(git_op("find branch"))?;
                branch.delete().map_err(git_op("delete branch"))?;
                info!(branch = %name, "deleted branch");
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(branch = %branch, "could not delete branch: {e}");
        }
    }

    /// Check whether a local branch exists.
    pub async fn branch_exists(&self, branch: &BranchName) -> RepoResult<bool> {
        let branch = branch.clone();
        self.with_repo(move |repo| {
            Ok(repo.find_branch(branch.as_str(), BranchType::Local).is_ok())
        })
        .await
    }

    /// List all local branch names.
    pub async fn list_branches(&self) -> RepoResult<Vec<BranchName>> {
        self.with_repo(|repo| {
            let mut names = Vec::new();
            let branches = repo
                .branches(Some(BranchType::Local))
                .map_err(git_op("list branches"))?;
            for entry in branches {
                let (branch, _) = entry.map_err(git_op("list branches"))?;
                if let Ok(Some(name)) = branch.name() {
                    names.push(BranchName::new(name));
                }
            }
            Ok(names)
        })
        .await
    }

    // ==================== Commits ====================

    /// The commit HEAD currently points at.
    pub async fn head(&self) -> RepoResult<CommitId> {
        self.with_repo(|repo| {
            let commit = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(git_op("resolve HEAD"))?;
            Ok(CommitId::new(commit.id()))
        })
        .await
    }

    /// Stage everything, including untracked files and deletions, and commit.
    ///
    /// Idempotent: when the staged tree is identical to HEAD's tree no commit
    /// is created and the current HEAD id is returned.
    pub async fn commit_all(&self, message: impl Into<String>) -> RepoResult<CommitId> {
        let message = message.into();
        self.with_repo(move |repo| {
            let mut index = repo.index().map_err(git_op("open index"))?;
            index
                .add_all(["*"], IndexAddOption::DEFAULT, None)
                .map_err(git_op("stage changes"))?;
            index.update_all(["*"], None).map_err(git_op("stage deletions"))?;
            index.write().map_err(git_op("write index"))?;
            let tree_id = index.write_tree().map_err(git_op("write tree"))?;

            let head = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(git_op("resolve HEAD"))?;
            if head.tree_id() == tree_id {
                debug!("no changes to commit");
                return Ok(CommitId::new(head.id()));
            }

            let tree = repo.find_tree(tree_id).map_err(git_op("find tree"))?;
            let sig = repo.signature().map_err(git_op("build signature"))?;
            let commit_id = repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&head])
                .map_err(git_op("commit"))?;
            info!(commit = %CommitId::new(commit_id).short(), message = %message, "created commit");
            Ok(CommitId::new(commit_id))
        })
        .await
    }

    // ==================== Merge / Reset ====================

    /// Merge `branch` into `main` with a real merge commit.
    ///
    /// History is preserved for audit, never squashed. When the branch tip
    /// already equals main's tip there is nothing to merge and the current
    /// head is returned.
    pub async fn merge_branch(
        &self,
        branch: &BranchName,
        message: impl Into<String>,
    ) -> RepoResult<CommitId> {
        let branch = branch.clone();
        let message = message.into();
        self.with_repo(move |repo| {
            checkout_blocking(repo, &BranchName::main())?;

            let main_commit = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(git_op("resolve HEAD"))?;
            let branch_commit = repo
                .find_branch(branch.as_str(), BranchType::Local)
                .and_then(|b| b.get().peel_to_commit())
                .map_err(git_op("resolve branch"))?;

            if branch_commit.id() == main_commit.id() {
                debug!(branch = %branch, "branch tip equals main, nothing to merge");
                return Ok(CommitId::new(main_commit.id()));
            }

            let mut merged = repo
                .merge_commits(&main_commit, &branch_commit, None)
                .map_err(git_op("merge"))?;
            if merged.has_conflicts() {
                let paths = merged
                    .conflicts()
                    .map_err(git_op("read conflicts"))?
                    .filter_map(|c| c.ok())
                    .filter_map(|c| c.our.or(c.their))
                    .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                    .collect();
                return Err(RepositoryError::MergeConflict {
                    branch: branch.to_string(),
                    paths,
                });
            }

            let tree_id = merged.write_tree_to(repo).map_err(git_op("write merge tree"))?;
            let tree = repo.find_tree(tree_id).map_err(git_op("find merge tree"))?;
            let sig = repo.signature().map_err(git_op("build signature"))?;
            let commit_id = repo
                .commit(
                    Some("HEAD"),
                    &sig,
                    &sig,
                    &message,
                    &tree,
                    &[&main_commit, &branch_commit],
                )
                .map_err(git_op("create merge commit"))?;

            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            repo.checkout_head(Some(&mut checkout))
                .map_err(git_op("refresh working tree"))?;

            info!(branch = %branch, commit = %CommitId::new(commit_id).short(), "merged branch into main");
            Ok(CommitId::new(commit_id))
        })
        .await
    }

    /// Hard reset to `main`, discarding uncommitted and untracked content.
    ///
    /// Used by both rollback and recovery.
    pub async fn reset_to_main(&self) -> RepoResult<()> {
        self.with_repo(|repo| {
            reset_to_main_blocking(repo)?;
            info!("reset to main branch");
            Ok(())
        })
        .await
    }

    // ==================== Workspace Clones ====================

    /// Clone this repository into a fresh temporary directory.
    ///
    /// The clone is fully fetched: every `origin/*` ref is materialized as a
    /// local branch, so a transaction branch created on origin can be checked
    /// out in the clone. This is the isolation mechanism letting a
    /// transaction mutate files without touching the shared tree.
    pub async fn clone_to_temp(&self) -> RepoResult<GitRepository> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let temp_dir = tempfile::Builder::new()
                .prefix(&inner.config.temp_clone_prefix)
                .tempdir()
                .map_err(io_op("create temp directory"))?
                .keep();
            info!(path = %temp_dir.display(), "creating temporary clone");

            let url = inner.path.to_string_lossy().into_owned();
            let cloned = RepoBuilder::new()
                .clone(&url, &temp_dir)
                .map_err(git_op("clone repository"))?;

            // Materialize local branches for every remote ref so the clone
            // holds the full branch set.
            let remote_refs: Vec<(String, git2::Oid)> = {
                let refs = cloned
                    .references_glob("refs/remotes/origin/*")
                    .map_err(git_op("list remote refs"))?;
                let mut collected = Vec::new();
                for entry in refs {
                    let reference = entry.map_err(git_op("list remote refs"))?;
                    let short = match reference.shorthand().and_then(|s| s.strip_prefix("origin/")) {
                        Some(s) if s != "HEAD" => s.to_string(),
                        _ => continue,
                    };
                    let commit = reference.peel_to_commit().map_err(git_op("resolve remote ref"))?;
                    collected.push((short, commit.id()));
                }
                collected
            };
            for (name, oid) in remote_refs {
                if cloned.find_branch(&name, BranchType::Local).is_ok() {
                    continue;
                }
                let commit = cloned.find_commit(oid).map_err(git_op("find commit"))?;
                cloned
                    .branch(&name, &commit, false)
                    .map_err(git_op("create local branch"))?;
            }

            ensure_user_config(&cloned, &inner.config).map_err(git_op("set user config"))?;

            let temp_dir = temp_dir
                .canonicalize()
                .map_err(io_op("canonicalize clone path"))?;
            Ok(GitRepository::from_parts(cloned, temp_dir, inner.config.clone()))
        })
        .await
        .map_err(|e| RepositoryError::Task(e.to_string()))?
    }

    /// Remove a temporary clone directory.
    ///
    /// Only acts on paths carrying the temp-clone prefix; anything else is
    /// refused, guarding against deleting a real repository. Best-effort.
    pub async fn cleanup_clone(&self) {
        let inner = Arc::clone(&self.inner);
        let is_temp_clone = inner
            .path
            .file_name()
            .map(|n| {
                n.to_string_lossy()
                    .starts_with(&inner.config.temp_clone_prefix)
            })
            .unwrap_or(false);
        if !is_temp_clone {
            warn!(path = %inner.path.display(), "refusing to clean up non-clone path");
            return;
        }

        let result = tokio::task::spawn_blocking(move || {
            // Hold the repo lock so nothing else is mid-operation while the
            // directory disappears underneath it.
            let _repo = inner.repo.lock();
            fs::remove_dir_all(&inner.path)?;
            info!(path = %inner.path.display(), "cleaned up temporary clone");
            Ok::<(), std::io::Error>(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("failed to clean up clone: {e}"),
            Err(e) => warn!("clone cleanup task failed: {e}"),
        }
    }

    /// Move a branch's full commit history from `source` into this
    /// repository without altering content.
    ///
    /// Implemented as a force-fetch over an anonymous remote pointing at the
    /// source clone's path. This is the single primitive the coordinator
    /// uses to get workspace commits back into origin.
    pub async fn transplant_branch(
        &self,
        source: &GitRepository,
        source_branch: &BranchName,
        dest_branch: &BranchName,
    ) -> RepoResult<()> {
        let url = source.path().to_string_lossy().into_owned();
        let refspec = format!("+{}:{}", source_branch.as_ref_path(), dest_branch.as_ref_path());
        let dest = dest_branch.clone();
        self.with_repo(move |repo| {
            let mut remote = repo
                .remote_anonymous(&url)
                .map_err(git_op("create anonymous remote"))?;
            remote
                .fetch(&[refspec.as_str()], None, None)
                .map_err(git_op("fetch from workspace"))?;
            info!(branch = %dest, "transplanted branch");
            Ok(())
        })
        .await
    }

    // ==================== Recovery ====================

    /// Idempotent crash-recovery entry point.
    ///
    /// Removes stale Git and write locks, force-checks-out `main`, hard
    /// resets, and deletes transaction branches whose tip commit is older
    /// than the configured retention window. Failure branches are exempt.
    /// Returns the number of stale branches deleted.
    pub async fn recover_to_clean_state(&self) -> RepoResult<usize> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let repo = inner.repo.lock();

            let index_lock = inner.path.join(".git").join("index.lock");
            if index_lock.exists() {
                fs::remove_file(&index_lock).map_err(io_op("remove index lock"))?;
                warn!("removed stale git index lock");
            }

            let write_lock = lock::lock_path(&inner.path, &inner.config.write_lock_file);
            match lock::remove_stale(&write_lock) {
                Ok(true) => warn!("removed stale write lock"),
                Ok(false) => {}
                Err(e) => return Err(io_op("remove write lock")(e)),
            }

            if repo.find_branch(BranchName::MAIN, BranchType::Local).is_err() {
                return Err(RepositoryError::MainBranchMissing(inner.path.clone()));
            }
            reset_to_main_blocking(&repo)?;

            let cutoff = (Utc::now() - inner.config.branch_retention).timestamp();
            let mut deleted = 0;
            let branches = repo
                .branches(Some(BranchType::Local))
                .map_err(git_op("list branches"))?;
            for entry in branches {
                let (mut branch, _) = entry.map_err(git_op("list branches"))?;
                let name = match branch.name() {
                    Ok(Some(n)) => n.to_string(),
                    _ => continue,
                };
                if !BranchName::new(&name).is_transaction_branch() {
                    continue;
                }
                let tip_time = match branch.get().peel_to_commit() {
                    Ok(commit) => commit.time().seconds(),
                    Err(e) => {
                        warn!(branch = %name, "could not inspect branch: {e}");
                        continue;
                    }
                };
                if tip_time < cutoff {
                    match branch.delete() {
                        Ok(()) => {
                            info!(branch = %name, "deleted stale transaction branch");
                            deleted += 1;
                        }
                        Err(e) => warn!(branch = %name, "could not delete stale branch: {e}"),
                    }
                }
            }
            if deleted > 0 {
                info!(count = deleted, "cleaned up stale transaction branches");
            }
            Ok(deleted)
        })
        .await
        .map_err(|e| RepositoryError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .finish()
    }
}

// ==================== Blocking Helpers ====================

fn ensure_user_config(repo: &Repository, config: &LayerConfig) -> Result<(), git2::Error> {
    let mut cfg = repo.config()?;
    let snapshot = cfg.snapshot()?;
    if snapshot.get_string("user.name").is_err() {
        cfg.set_str("user.name", &config.author_name)?;
    }
    if snapshot.get_string("user.email").is_err() {
        cfg.set_str("user.email", &config.author_email)?;
    }
    Ok(())
}

fn create_initial_commit(repo: &Repository, path: &Path) -> RepoResult<()> {
    fs::write(path.join(".gitignore"), GITIGNORE_CONTENT).map_err(io_op("write gitignore"))?;
    let mut index = repo.index().map_err(git_op("open index"))?;
    index
        .add_path(Path::new(".gitignore"))
        .map_err(git_op("stage gitignore"))?;
    index.write().map_err(git_op("write index"))?;
    let tree_id = index.write_tree().map_err(git_op("write tree"))?;
    let tree = repo.find_tree(tree_id).map_err(git_op("find tree"))?;
    let sig = repo.signature().map_err(git_op("build signature"))?;
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .map_err(git_op("create initial commit"))?;
    Ok(())
}

/// Make sure a `main` branch exists, renaming the default branch if the
/// engine created something else (e.g. `master`).
fn ensure_main_branch(repo: &Repository, path: &Path) -> RepoResult<()> {
    if repo.find_branch(BranchName::MAIN, BranchType::Local).is_ok() {
        return Ok(());
    }
    let head = repo.head().map_err(git_op("resolve HEAD"))?;
    let name = match head.shorthand() {
        Some(n) => n.to_string(),
        None => return Err(RepositoryError::MainBranchMissing(path.to_path_buf())),
    };
    let mut branch = repo
        .find_branch(&name, BranchType::Local)
        .map_err(git_op("find default branch"))?;
    branch
        .rename(BranchName::MAIN, true)
        .map_err(git_op("rename default branch"))?;
    repo.set_head("refs/heads/main").map_err(git_op("set HEAD"))?;
    info!(from = %name, "renamed default branch to main");
    Ok(())
}

fn checkout_blocking(repo: &Repository, branch: &BranchName) -> RepoResult<()> {
    let obj = repo
        .revparse_single(&branch.as_ref_path())
        .map_err(git_op("resolve branch"))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(&obj, Some(&mut checkout))
        .map_err(git_op("checkout tree"))?;
    repo.set_head(&branch.as_ref_path())
        .map_err(git_op("set HEAD"))?;
    Ok(())
}

fn reset_to_main_blocking(repo: &Repository) -> RepoResult<()> {
    repo.set_head("refs/heads/main").map_err(git_op("set HEAD"))?;
    let obj = repo
        .revparse_single("refs/heads/main")
        .map_err(git_op("resolve main"))?;
    repo.reset(&obj, ResetType::Hard, None)
        .map_err(git_op("hard reset"))?;
    // git_reset forces GIT_CHECKOUT_FORCE and drops REMOVE_UNTRACKED, so the
    // untracked sweep needs its own checkout pass.
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.checkout_head(Some(&mut checkout))
        .map_err(git_op("remove untracked files"))?;
    Ok(())
}
