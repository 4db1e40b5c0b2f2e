//! Whether a user may add or remove lgtm on a pull request.
//!
//! In order, a user is authorized when:
//! 1. they hold `admin` or `write` on the repository;
//! 2. they are listed in the repository root `OWNERS` file at the base ref;
//! 3. the repository is governed by sig ownership, every changed file lies
//!    under a sig directory, and they are listed in the `OWNERS` file of
//!    every sig directory the pull request touches.
//!
//! Fetch failures are returned as errors; they never turn into a denial.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::info;

use crate::config::{BotConfig, PathPattern};
use crate::event::PullRequestContext;
use crate::owners::{decode_owners, OwnershipRecord};
use crate::platform::{BranchRef, OwnersCache, PlatformClient};

pub const OWNERS_FILE: &str = "OWNERS";

/// Decide whether `login` may change lgtm labels on `pr`.
pub async fn has_permission(
    platform: &dyn PlatformClient,
    cache: &dyn OwnersCache,
    login: &str,
    pr: &PullRequestContext,
    cfg: &BotConfig,
) -> Result<bool> {
    let role = platform.get_user_role(&pr.org, &pr.repo, login).await?;
    if role.can_approve() {
        info!(
            "{} has {:?} permission on {}/{}, authorized",
            login, role, pr.org, pr.repo
        );
        return Ok(true);
    }

    let repo_owners = get_repo_owners(platform, pr).await?;
    if repo_owners.contains(login) {
        info!(
            "{} is listed in the root {} of {}/{}, authorized",
            login, OWNERS_FILE, pr.org, pr.repo
        );
        return Ok(true);
    }

    if !cfg.is_special_repo(&pr.org, &pr.repo) {
        info!(
            "{} is neither a collaborator nor an owner of {}/{}",
            login, pr.org, pr.repo
        );
        return Ok(false);
    }

    is_owner_of_sigs(platform, cache, login, pr, &cfg.sig_path_pattern).await
}

async fn get_repo_owners(
    platform: &dyn PlatformClient,
    pr: &PullRequestContext,
) -> Result<OwnershipRecord> {
    let case_insensitive = platform.case_insensitive_logins();
    let content = platform
        .get_path_content(&pr.org, &pr.repo, OWNERS_FILE, &pr.base_ref)
        .await?;

    Ok(match content {
        Some(content) => decode_owners(&content, case_insensitive),
        None => OwnershipRecord::empty(case_insensitive),
    })
}

/// The sig directory (first two path segments) a changed path belongs to.
///
/// `None` when the path does not match `pattern` or has no content beneath
/// a second segment.
pub fn sig_dir_of(path: &str, pattern: &PathPattern) -> Option<String> {
    if !pattern.is_match(path) {
        return None;
    }

    let mut segments = path.splitn(3, '/');
    let top = segments.next().filter(|s| !s.is_empty())?;
    let sig = segments.next().filter(|s| !s.is_empty())?;
    segments.next().filter(|rest| !rest.is_empty())?;

    Some(format!("{}/{}", top, sig))
}

/// Distinct sig directories touched by `changed_files`.
///
/// A single file outside the pattern disqualifies the whole change set, as
/// does an empty change set.
pub fn sig_dirs_of(changed_files: &[String], pattern: &PathPattern) -> Option<BTreeSet<String>> {
    let mut dirs = BTreeSet::new();
    for file in changed_files {
        dirs.insert(sig_dir_of(file, pattern)?);
    }

    if dirs.is_empty() {
        None
    } else {
        Some(dirs)
    }
}

async fn is_owner_of_sigs(
    platform: &dyn PlatformClient,
    cache: &dyn OwnersCache,
    login: &str,
    pr: &PullRequestContext,
    pattern: &PathPattern,
) -> Result<bool> {
    let changed_files = platform
        .list_pr_changed_files(&pr.org, &pr.repo, pr.number)
        .await?;

    if changed_files.is_empty() {
        info!(
            "PR #{} in {}/{} changes no files, no sig owner can approve it, denying {}",
            pr.number, pr.org, pr.repo, login
        );
        return Ok(false);
    }

    let Some(mut remaining) = sig_dirs_of(&changed_files, pattern) else {
        info!(
            "PR #{} in {}/{} changes files outside sig directories (pattern {}), denying {}",
            pr.number,
            pr.org,
            pr.repo,
            pattern.as_str(),
            login
        );
        return Ok(false);
    };

    let branch = BranchRef {
        platform: platform.name().to_string(),
        org: pr.org.clone(),
        repo: pr.repo.clone(),
        branch: pr.base_ref.clone(),
    };

    let files = cache.get_files(&branch, OWNERS_FILE, true).await?;
    if files.is_empty() {
        info!(
            org = %pr.org,
            repo = %pr.repo,
            branch = %pr.base_ref,
            "there are no {} files stored in the cache",
            OWNERS_FILE
        );
        return Ok(false);
    }

    let case_insensitive = platform.case_insensitive_logins();
    for file in &files {
        if file.file_name() != OWNERS_FILE || !remaining.contains(file.dir()) {
            continue;
        }

        if !decode_owners(&file.content, case_insensitive).contains(login) {
            info!("{} is not an owner of {}, denying", login, file.dir());
            return Ok(false);
        }

        remaining.remove(file.dir());
        if remaining.is_empty() {
            info!(
                "{} owns every sig directory touched by PR #{}, authorized",
                login, pr.number
            );
            return Ok(true);
        }
    }

    info!(
        "No {} file found for {:?}, denying {}",
        OWNERS_FILE, remaining, login
    );
    Ok(false)
}
