//! In-memory implementation of `PlatformClient` and `OwnersCache`.
//!
//! Models a single pull request. Every call is logged so tests can assert
//! which collaborators were (or were not) consulted, and individual
//! operations can be made to fail.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BranchRef, CachedFile, OwnersCache, PlatformClient, PrComment, RepoRole};

#[derive(Debug, Default)]
struct PlatformState {
    bot_login: String,
    roles: HashMap<String, RepoRole>,
    contents: HashMap<(String, String), String>,
    changed_files: Vec<String>,
    pr_labels: BTreeSet<String>,
    repo_labels: BTreeSet<String>,
    comments: Vec<PrComment>,
    posted_comments: Vec<String>,
    trees: HashMap<String, String>,
    cached_files: Vec<CachedFile>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

impl PlatformState {
    fn record(&mut self, call: String) -> Result<()> {
        let op = call.split('(').next().unwrap_or_default().to_string();
        self.calls.push(call);
        if self.failing.contains(&op) {
            return Err(anyhow!("injected failure in {}", op));
        }
        Ok(())
    }
}

/// In-memory platform and file cache.
pub struct InMemoryPlatform {
    state: RwLock<PlatformState>,
    requires_label_definitions: bool,
}

impl InMemoryPlatform {
    pub fn new(bot_login: &str) -> Self {
        Self {
            state: RwLock::new(PlatformState {
                bot_login: bot_login.to_string(),
                ..PlatformState::default()
            }),
            requires_label_definitions: false,
        }
    }

    pub fn with_label_definitions_required(mut self) -> Self {
        self.requires_label_definitions = true;
        self
    }

    pub fn with_role(mut self, login: &str, role: RepoRole) -> Self {
        self.state
            .get_mut()
            .roles
            .insert(login.to_lowercase(), role);
        self
    }

    /// Store a file (base64 content) at a path and ref.
    pub fn with_file(mut self, path: &str, git_ref: &str, content: &str) -> Self {
        self.state
            .get_mut()
            .contents
            .insert((path.to_string(), git_ref.to_string()), content.to_string());
        self
    }

    pub fn with_changed_files(mut self, files: &[&str]) -> Self {
        self.state.get_mut().changed_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_pr_labels(mut self, labels: &[&str]) -> Self {
        self.state.get_mut().pr_labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_repo_labels(mut self, labels: &[&str]) -> Self {
        self.state.get_mut().repo_labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_comment(mut self, comment: PrComment) -> Self {
        self.state.get_mut().comments.push(comment);
        self
    }

    pub fn with_tree(mut self, sha: &str, tree: &str) -> Self {
        self.state
            .get_mut()
            .trees
            .insert(sha.to_string(), tree.to_string());
        self
    }

    /// Add a file to the file cache (base64 content).
    pub fn with_cached_file(mut self, path: &str, content: &str) -> Self {
        self.state.get_mut().cached_files.push(CachedFile {
            path: path.to_string(),
            content: content.to_string(),
        });
        self
    }

    /// Make every call to `operation` fail.
    pub fn failing(mut self, operation: &str) -> Self {
        self.state.get_mut().failing.insert(operation.to_string());
        self
    }

    pub async fn pr_labels(&self) -> BTreeSet<String> {
        self.state.read().await.pr_labels.clone()
    }

    pub async fn repo_labels(&self) -> BTreeSet<String> {
        self.state.read().await.repo_labels.clone()
    }

    pub async fn posted_comments(&self) -> Vec<String> {
        self.state.read().await.posted_comments.clone()
    }

    /// Every call made so far, e.g. `get_user_role(alice)`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    /// Whether any call to `operation` was made.
    pub async fn was_called(&self, operation: &str) -> bool {
        let prefix = format!("{}(", operation);
        self.state
            .read()
            .await
            .calls
            .iter()
            .any(|c| c.starts_with(&prefix))
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    fn requires_label_definitions(&self) -> bool {
        self.requires_label_definitions
    }

    async fn bot_login(&self) -> Result<String> {
        let mut state = self.state.write().await;
        state.record("bot_login()".to_string())?;
        Ok(state.bot_login.clone())
    }

    async fn get_user_role(&self, _org: &str, _repo: &str, login: &str) -> Result<RepoRole> {
        let mut state = self.state.write().await;
        state.record(format!("get_user_role({})", login))?;
        Ok(state
            .roles
            .get(&login.to_lowercase())
            .copied()
            .unwrap_or(RepoRole::None))
    }

    async fn get_path_content(
        &self,
        _org: &str,
        _repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        let mut state = self.state.write().await;
        state.record(format!("get_path_content({}@{})", path, git_ref))?;
        Ok(state
            .contents
            .get(&(path.to_string(), git_ref.to_string()))
            .cloned())
    }

    async fn list_pr_changed_files(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
    ) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        state.record(format!("list_pr_changed_files({})", number))?;
        Ok(state.changed_files.clone())
    }

    async fn add_pr_label(&self, _org: &str, _repo: &str, _number: u64, label: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(format!("add_pr_label({})", label))?;
        state.pr_labels.insert(label.to_string());
        Ok(())
    }

    async fn remove_pr_label(
        &self,
        _org: &str,
        _repo: &str,
        _number: u64,
        label: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(format!("remove_pr_label({})", label))?;
        state.pr_labels.remove(label);
        Ok(())
    }

    async fn remove_pr_labels(
        &self,
        _org: &str,
        _repo: &str,
        _number: u64,
        labels: &[String],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(format!("remove_pr_labels({})", labels.join(",")))?;
        for label in labels {
            state.pr_labels.remove(label);
        }
        Ok(())
    }

    async fn list_repo_labels(&self, _org: &str, _repo: &str) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        state.record("list_repo_labels()".to_string())?;
        Ok(state.repo_labels.iter().cloned().collect())
    }

    async fn create_repo_label(&self, _org: &str, _repo: &str, label: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(format!("create_repo_label({})", label))?;
        state.repo_labels.insert(label.to_string());
        Ok(())
    }

    async fn create_pr_comment(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
        body: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(format!("create_pr_comment({})", number))?;
        state.posted_comments.push(body.to_string());
        Ok(())
    }

    async fn list_pr_comments(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
    ) -> Result<Vec<PrComment>> {
        let mut state = self.state.write().await;
        state.record(format!("list_pr_comments({})", number))?;
        Ok(state.comments.clone())
    }

    async fn get_commit_tree(&self, _org: &str, _repo: &str, sha: &str) -> Result<String> {
        let mut state = self.state.write().await;
        state.record(format!("get_commit_tree({})", sha))?;
        state
            .trees
            .get(sha)
            .cloned()
            .ok_or_else(|| anyhow!("commit {} not found", sha))
    }
}

#[async_trait]
impl OwnersCache for InMemoryPlatform {
    async fn get_files(
        &self,
        branch: &BranchRef,
        file_name: &str,
        recursive: bool,
    ) -> Result<Vec<CachedFile>> {
        let mut state = self.state.write().await;
        state.record(format!("get_files({}:{})", branch.branch, file_name))?;
        Ok(state
            .cached_files
            .iter()
            .filter(|f| f.file_name() == file_name)
            .filter(|f| recursive || f.dir().is_empty())
            .cloned()
            .collect())
    }
}
