//! Collaborator interfaces.
//!
//! `PlatformClient` is the code-hosting platform (permissions, contents,
//! labels, comments, commits). `OwnersCache` is the repository file cache
//! that returns every `OWNERS` file beneath a branch in one round trip.
//! Implementations are expected to give labels idempotent semantics: adding a
//! present label or removing an absent one is not an error.

mod memory;

pub use memory::InMemoryPlatform;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A user's permission level on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoRole {
    Admin,
    Write,
    Read,
    None,
}

impl RepoRole {
    /// Map a platform permission string onto a role.
    ///
    /// GitHub reports `maintain` as `write` in the legacy field, but the
    /// role name may also be passed through directly.
    pub fn from_permission(permission: &str) -> Self {
        match permission.to_ascii_lowercase().as_str() {
            "admin" => RepoRole::Admin,
            "write" | "maintain" | "push" => RepoRole::Write,
            "read" | "triage" | "pull" => RepoRole::Read,
            _ => RepoRole::None,
        }
    }

    /// Whether this role may change lgtm labels without consulting `OWNERS`.
    pub fn can_approve(self) -> bool {
        matches!(self, RepoRole::Admin | RepoRole::Write)
    }
}

/// A comment on a pull request, oldest first when listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrComment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrComment {
    pub fn is_edited(&self) -> bool {
        self.created_at != self.updated_at
    }
}

/// The branch a file cache lookup is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub platform: String,
    pub org: String,
    pub repo: String,
    pub branch: String,
}

/// A file returned by the file cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// Repository-relative path, e.g. `sig/compiler/OWNERS`.
    pub path: String,
    /// Base64 encoded content.
    pub content: String,
}

impl CachedFile {
    /// Directory containing the file, `""` for the repository root.
    pub fn dir(&self) -> &str {
        self.path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }

    pub fn file_name(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.path)
    }
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Platform name used to scope file cache lookups.
    fn name(&self) -> &str;

    /// Whether logins compare case-insensitively on this platform.
    fn case_insensitive_logins(&self) -> bool {
        true
    }

    /// Whether a label must be defined on the repository before it can be
    /// attached to a pull request.
    fn requires_label_definitions(&self) -> bool {
        false
    }

    /// Login the bot posts comments as.
    async fn bot_login(&self) -> Result<String>;

    async fn get_user_role(&self, org: &str, repo: &str, login: &str) -> Result<RepoRole>;

    /// Base64 content of a file at a ref, `None` when the file does not exist.
    async fn get_path_content(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>>;

    async fn list_pr_changed_files(&self, org: &str, repo: &str, number: u64)
        -> Result<Vec<String>>;

    async fn add_pr_label(&self, org: &str, repo: &str, number: u64, label: &str) -> Result<()>;

    async fn remove_pr_label(&self, org: &str, repo: &str, number: u64, label: &str)
        -> Result<()>;

    /// Remove several labels as one mutation: on failure none of them should
    /// have been removed. Labels not attached are skipped.
    async fn remove_pr_labels(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<()>;

    async fn list_repo_labels(&self, org: &str, repo: &str) -> Result<Vec<String>>;

    async fn create_repo_label(&self, org: &str, repo: &str, label: &str) -> Result<()>;

    async fn create_pr_comment(&self, org: &str, repo: &str, number: u64, body: &str)
        -> Result<()>;

    /// All comments on a pull request in chronological order.
    async fn list_pr_comments(&self, org: &str, repo: &str, number: u64)
        -> Result<Vec<PrComment>>;

    /// Tree fingerprint of a commit.
    async fn get_commit_tree(&self, org: &str, repo: &str, sha: &str) -> Result<String>;
}

#[async_trait]
pub trait OwnersCache: Send + Sync {
    /// Every file called `file_name` on the branch, searching subdirectories
    /// when `recursive` is set.
    async fn get_files(
        &self,
        branch: &BranchRef,
        file_name: &str,
        recursive: bool,
    ) -> Result<Vec<CachedFile>>;
}
