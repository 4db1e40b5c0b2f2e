//! Applies lgtm commands and branch updates to a pull request's labels.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::command::{parse_comment, LgtmCommand};
use crate::config::{BotConfig, Configuration};
use crate::event::{CommentEvent, Event, PrState, PullRequestContext};
use crate::label::{lgtm_label_for, lgtm_labels_on, LGTM_LABEL};
use crate::owners::normalize_login;
use crate::permission::has_permission;
use crate::platform::{OwnersCache, PlatformClient};
use crate::staleness::{fingerprint_marker, latest_fingerprint};

/// Notice posted when lgtm is added.
pub fn lgtm_added_message(commenter: &str) -> String {
    format!(
        "***lgtm*** is added in this pull request by: ***{}***. :wave:",
        commenter
    )
}

pub const LGTM_SELF_OWN_MESSAGE: &str =
    "***lgtm*** can not be added in your self-own pull request. :astonished:";

/// Notice posted when `commenter` may not `action` lgtm.
pub fn lgtm_no_permission_message(commenter: &str, action: LgtmCommand) -> String {
    format!(
        "***@{}*** has no permission to {} ***lgtm*** in this pull request. :astonished:\n\
        Please contact to the collaborators in this repository.",
        commenter, action
    )
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to act on (no command, closed PR, no lgtm labels).
    Ignored,
    /// The PR author tried to lgtm their own PR.
    SelfOwned,
    /// The commenter is not authorized for this action.
    Denied(LgtmCommand),
    LabelAdded(String),
    /// Labels removed, sorted.
    LabelsRemoved(Vec<String>),
    /// A push did not change the tree, so lgtm labels stay.
    LabelsRetained(Vec<String>),
}

/// Label state manager for one platform and file cache.
pub struct Robot {
    platform: Arc<dyn PlatformClient>,
    cache: Arc<dyn OwnersCache>,
}

impl Robot {
    pub fn new(platform: Arc<dyn PlatformClient>, cache: Arc<dyn OwnersCache>) -> Self {
        Self { platform, cache }
    }

    /// Handle one event with the configuration for its repository.
    ///
    /// Fails before doing anything if the repository has no config item.
    pub async fn handle_event(&self, event: &Event, config: &Configuration) -> Result<Outcome> {
        let pr = event.pull_request();
        let cfg = config.config_for(&pr.org, &pr.repo).ok_or_else(|| {
            anyhow!("no lgtm robot config for this repo: {}/{}", pr.org, pr.repo)
        })?;

        match event {
            Event::CommentCreated(e) => self.handle_comment(e, cfg).await,
            Event::BranchUpdated(e) => self.clear_lgtm(&e.pr, cfg).await,
        }
    }

    pub async fn handle_comment(&self, event: &CommentEvent, cfg: &BotConfig) -> Result<Outcome> {
        if event.pr_state != PrState::Open {
            return Ok(Outcome::Ignored);
        }

        match parse_comment(&event.body) {
            Some(LgtmCommand::Add) => self.add_lgtm(&event.pr, &event.commenter, cfg).await,
            Some(LgtmCommand::Remove) => self.remove_lgtm(&event.pr, &event.commenter, cfg).await,
            None => Ok(Outcome::Ignored),
        }
    }

    fn is_author(&self, pr: &PullRequestContext, login: &str) -> bool {
        let case_insensitive = self.platform.case_insensitive_logins();
        normalize_login(&pr.author, case_insensitive) == normalize_login(login, case_insensitive)
    }

    pub async fn add_lgtm(
        &self,
        pr: &PullRequestContext,
        commenter: &str,
        cfg: &BotConfig,
    ) -> Result<Outcome> {
        let (org, repo, number) = (pr.org.as_str(), pr.repo.as_str(), pr.number);

        if self.is_author(pr, commenter) {
            info!("{} tried to lgtm their own PR #{}", commenter, number);
            self.platform
                .create_pr_comment(org, repo, number, LGTM_SELF_OWN_MESSAGE)
                .await?;
            return Ok(Outcome::SelfOwned);
        }

        if !has_permission(&*self.platform, &*self.cache, commenter, pr, cfg).await? {
            let comment = lgtm_no_permission_message(commenter, LgtmCommand::Add);
            self.platform
                .create_pr_comment(org, repo, number, &comment)
                .await?;
            return Ok(Outcome::Denied(LgtmCommand::Add));
        }

        // Read everything the notice needs before touching labels.
        let mut comment = lgtm_added_message(commenter);
        if !cfg.close_store_sha {
            let tree = self
                .platform
                .get_commit_tree(org, repo, &pr.head_sha)
                .await?;
            comment.push('\n');
            comment.push_str(&fingerprint_marker(&tree));
        }

        let label = lgtm_label_for(commenter, cfg.multiple_lgtm_label);
        if label != LGTM_LABEL && self.platform.requires_label_definitions() {
            self.create_label_if_needed(org, repo, &label).await?;
        }

        self.platform.add_pr_label(org, repo, number, &label).await?;
        self.platform
            .create_pr_comment(org, repo, number, &comment)
            .await?;

        info!("Added {} to PR #{} in {}/{}", label, number, org, repo);
        Ok(Outcome::LabelAdded(label))
    }

    pub async fn remove_lgtm(
        &self,
        pr: &PullRequestContext,
        commenter: &str,
        cfg: &BotConfig,
    ) -> Result<Outcome> {
        let (org, repo, number) = (pr.org.as_str(), pr.repo.as_str(), pr.number);

        // The author can withdraw every lgtm on their own PR.
        if self.is_author(pr, commenter) {
            let labels = lgtm_labels_on(&pr.labels);
            if labels.is_empty() {
                return Ok(Outcome::Ignored);
            }

            self.platform
                .remove_pr_labels(org, repo, number, &labels)
                .await?;
            info!(
                "Author {} removed {:?} from PR #{}",
                commenter, labels, number
            );
            return Ok(Outcome::LabelsRemoved(labels));
        }

        if !has_permission(&*self.platform, &*self.cache, commenter, pr, cfg).await? {
            let comment = lgtm_no_permission_message(commenter, LgtmCommand::Remove);
            self.platform
                .create_pr_comment(org, repo, number, &comment)
                .await?;
            return Ok(Outcome::Denied(LgtmCommand::Remove));
        }

        let label = lgtm_label_for(commenter, cfg.multiple_lgtm_label);
        self.platform
            .remove_pr_label(org, repo, number, &label)
            .await?;

        info!("Removed {} from PR #{} in {}/{}", label, number, org, repo);
        Ok(Outcome::LabelsRemoved(vec![label]))
    }

    async fn create_label_if_needed(&self, org: &str, repo: &str, label: &str) -> Result<()> {
        let repo_labels = self.platform.list_repo_labels(org, repo).await?;
        if repo_labels.iter().any(|l| l == label) {
            return Ok(());
        }

        info!("Creating label {} in {}/{}", label, org, repo);
        self.platform.create_repo_label(org, repo, label).await
    }

    /// Drop lgtm labels after the source branch changed, unless the new head
    /// has the same tree the last lgtm was given for.
    pub async fn clear_lgtm(&self, pr: &PullRequestContext, cfg: &BotConfig) -> Result<Outcome> {
        let (org, repo, number) = (pr.org.as_str(), pr.repo.as_str(), pr.number);

        let labels = lgtm_labels_on(&pr.labels);
        if labels.is_empty() {
            return Ok(Outcome::Ignored);
        }

        if !cfg.close_store_sha {
            let comments = self.platform.list_pr_comments(org, repo, number).await?;
            let bot_login = self.platform.bot_login().await?;

            match latest_fingerprint(&comments, &bot_login, self.platform.case_insensitive_logins())
            {
                Some(recorded) => {
                    let tree = self
                        .platform
                        .get_commit_tree(org, repo, &pr.head_sha)
                        .await?;
                    if tree == recorded {
                        info!(
                            "Tree of {} is unchanged on PR #{}, keeping {:?}",
                            pr.head_sha, number, labels
                        );
                        return Ok(Outcome::LabelsRetained(labels));
                    }
                    info!(
                        "Tree changed on PR #{} ({} -> {})",
                        number, recorded, tree
                    );
                }
                None => {
                    info!("No lgtm fingerprint recorded on PR #{}", number);
                }
            }
        }

        self.platform
            .remove_pr_labels(org, repo, number, &labels)
            .await?;
        info!(
            "Source branch of PR #{} changed, removed {:?}",
            number, labels
        );
        Ok(Outcome::LabelsRemoved(labels))
    }
}

#[cfg(test)]
mod tests;
