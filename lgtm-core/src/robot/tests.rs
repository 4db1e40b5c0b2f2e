use std::collections::BTreeSet;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, TimeZone, Utc};

use super::*;
use crate::event::BranchUpdateEvent;
use crate::platform::{InMemoryPlatform, PrComment, RepoRole};

const BOT: &str = "lgtm-bot[bot]";

fn owners(logins: &[&str]) -> String {
    let list: String = logins.iter().map(|l| format!("  - {}\n", l)).collect();
    general_purpose::STANDARD.encode(format!("maintainers:\n{}", list))
}

fn pr(labels: &[&str]) -> PullRequestContext {
    PullRequestContext {
        org: "openeuler".to_string(),
        repo: "community".to_string(),
        number: 42,
        author: "Author".to_string(),
        head_sha: "head1".to_string(),
        base_ref: "master".to_string(),
        labels: labels.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
    }
}

fn comment_event(commenter: &str, body: &str, labels: &[&str]) -> Event {
    Event::CommentCreated(CommentEvent {
        pr: pr(labels),
        pr_state: PrState::Open,
        commenter: commenter.to_string(),
        body: body.to_string(),
    })
}

fn branch_event(labels: &[&str]) -> Event {
    Event::BranchUpdated(BranchUpdateEvent { pr: pr(labels) })
}

fn config(multiple: bool, close_store_sha: bool) -> Configuration {
    let mut item = BotConfig::for_repos(["openeuler"]);
    item.multiple_lgtm_label = multiple;
    item.close_store_sha = close_store_sha;
    item.special_repos = vec!["community".to_string()];
    Configuration {
        config_items: vec![item],
    }
}

fn bot_comment(id: u64, body: &str, edited: bool) -> PrComment {
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(id as i64);
    PrComment {
        id,
        author: BOT.to_string(),
        body: body.to_string(),
        created_at: created,
        updated_at: if edited {
            created + Duration::seconds(30)
        } else {
            created
        },
    }
}

fn robot(platform: &Arc<InMemoryPlatform>) -> Robot {
    Robot::new(platform.clone(), platform.clone())
}

#[tokio::test]
async fn test_reviewer_with_write_adds_per_user_label() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_role("alice", RepoRole::Write)
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&comment_event("Alice", "/lgtm", &[]), &config(true, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LabelAdded("lgtm-alice".to_string()));
    assert!(platform.pr_labels().await.contains("lgtm-alice"));

    let posted = platform.posted_comments().await;
    assert_eq!(posted.len(), 1);
    assert!(posted[0].starts_with(&lgtm_added_message("Alice")));
    assert!(posted[0].ends_with("<!-- lgtm-tree: tree1 -->"));
}

#[tokio::test]
async fn test_shared_label_mode() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_role("alice", RepoRole::Admin)
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&comment_event("alice", "/LGTM  ", &[]), &config(false, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LabelAdded("lgtm".to_string()));
}

#[tokio::test]
async fn test_no_fingerprint_when_store_sha_closed() {
    let platform = Arc::new(InMemoryPlatform::new(BOT).with_role("alice", RepoRole::Write));

    robot(&platform)
        .handle_event(&comment_event("alice", "/lgtm", &[]), &config(true, true))
        .await
        .unwrap();

    assert!(!platform.was_called("get_commit_tree").await);
    assert_eq!(
        platform.posted_comments().await,
        vec![lgtm_added_message("alice")]
    );
}

#[tokio::test]
async fn test_author_cannot_add_lgtm() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_role("author", RepoRole::Admin)
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&comment_event("author", "/lgtm", &[]), &config(true, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::SelfOwned);
    assert!(platform.pr_labels().await.is_empty());
    assert!(!platform.was_called("get_user_role").await);
    assert_eq!(
        platform.posted_comments().await,
        vec![LGTM_SELF_OWN_MESSAGE.to_string()]
    );
}

#[tokio::test]
async fn test_unauthorized_add_posts_notice() {
    let platform = Arc::new(InMemoryPlatform::new(BOT).with_role("mallory", RepoRole::Read));

    let outcome = robot(&platform)
        .handle_event(&comment_event("mallory", "/lgtm", &[]), &config(true, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Denied(LgtmCommand::Add));
    assert!(platform.pr_labels().await.is_empty());
    assert_eq!(
        platform.posted_comments().await,
        vec![lgtm_no_permission_message("mallory", LgtmCommand::Add)]
    );
}

#[tokio::test]
async fn test_no_permission_message_names_action() {
    let message = lgtm_no_permission_message("mallory", LgtmCommand::Remove);
    assert!(message.starts_with("***@mallory*** has no permission to remove ***lgtm***"));
    assert!(message.ends_with("Please contact to the collaborators in this repository."));
}

#[tokio::test]
async fn test_sig_owner_adds_lgtm() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_changed_files(&["sig/a/README.md", "sig/b/OWNERS"])
            .with_cached_file("sig/a/OWNERS", &owners(&["carol"]))
            .with_cached_file("sig/b/OWNERS", &owners(&["Carol", "dave"]))
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&comment_event("carol", "/lgtm", &[]), &config(true, false))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::LabelAdded("lgtm-carol".to_string()));

    let outcome = robot(&platform)
        .handle_event(&comment_event("dave", "/lgtm", &[]), &config(true, false))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Denied(LgtmCommand::Add));
}

#[tokio::test]
async fn test_label_definition_created_when_required() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_label_definitions_required()
            .with_role("alice", RepoRole::Write)
            .with_repo_labels(&["lgtm"])
            .with_tree("head1", "tree1"),
    );

    robot(&platform)
        .handle_event(&comment_event("alice", "/lgtm", &[]), &config(true, false))
        .await
        .unwrap();
    assert!(platform.repo_labels().await.contains("lgtm-alice"));

    // A second lgtm finds the definition and does not recreate it.
    robot(&platform)
        .handle_event(&comment_event("alice", "/lgtm", &[]), &config(true, false))
        .await
        .unwrap();
    let creates = platform
        .calls()
        .await
        .into_iter()
        .filter(|c| c.starts_with("create_repo_label("))
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn test_bare_label_never_defined() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_label_definitions_required()
            .with_role("alice", RepoRole::Write)
            .with_tree("head1", "tree1"),
    );

    robot(&platform)
        .handle_event(&comment_event("alice", "/lgtm", &[]), &config(false, false))
        .await
        .unwrap();

    assert!(!platform.was_called("list_repo_labels").await);
    assert!(platform.pr_labels().await.contains("lgtm"));
}

#[tokio::test]
async fn test_failed_tree_fetch_leaves_labels_alone() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_role("alice", RepoRole::Write)
            .failing("get_commit_tree"),
    );

    let result = robot(&platform)
        .handle_event(&comment_event("alice", "/lgtm", &[]), &config(true, false))
        .await;

    assert!(result.is_err());
    assert!(!platform.was_called("add_pr_label").await);
    assert!(platform.posted_comments().await.is_empty());
}

#[tokio::test]
async fn test_author_removes_every_lgtm_label() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT).with_pr_labels(&["lgtm-alice", "lgtm-bob", "bug", "lgtm"]),
    );

    let outcome = robot(&platform)
        .handle_event(
            &comment_event("author", "/lgtm cancel", &["lgtm-alice", "lgtm-bob", "bug", "lgtm"]),
            &config(true, false),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::LabelsRemoved(vec![
            "lgtm".to_string(),
            "lgtm-alice".to_string(),
            "lgtm-bob".to_string()
        ])
    );
    assert_eq!(
        platform.pr_labels().await.into_iter().collect::<Vec<_>>(),
        vec!["bug".to_string()]
    );
    assert_eq!(
        platform.calls().await,
        vec!["remove_pr_labels(lgtm,lgtm-alice,lgtm-bob)".to_string()]
    );
}

#[tokio::test]
async fn test_author_remove_without_labels_is_noop() {
    let platform = Arc::new(InMemoryPlatform::new(BOT));

    let outcome = robot(&platform)
        .handle_event(&comment_event("AUTHOR", "/lgtm cancel", &["bug"]), &config(true, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Ignored);
    assert!(platform.calls().await.is_empty());
}

#[tokio::test]
async fn test_reviewer_removes_own_label() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_role("bob", RepoRole::Write)
            .with_pr_labels(&["lgtm-alice", "lgtm-bob"]),
    );

    let outcome = robot(&platform)
        .handle_event(
            &comment_event("bob", "/lgtm cancel", &["lgtm-alice", "lgtm-bob"]),
            &config(true, false),
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LabelsRemoved(vec!["lgtm-bob".to_string()]));
    assert_eq!(
        platform.pr_labels().await.into_iter().collect::<Vec<_>>(),
        vec!["lgtm-alice".to_string()]
    );
}

#[tokio::test]
async fn test_unauthorized_remove_posts_notice() {
    let platform = Arc::new(InMemoryPlatform::new(BOT).with_pr_labels(&["lgtm-alice"]));

    let outcome = robot(&platform)
        .handle_event(
            &comment_event("mallory", "/lgtm cancel", &["lgtm-alice"]),
            &config(true, false),
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Denied(LgtmCommand::Remove));
    assert!(platform.pr_labels().await.contains("lgtm-alice"));
    assert_eq!(
        platform.posted_comments().await,
        vec![lgtm_no_permission_message("mallory", LgtmCommand::Remove)]
    );
}

#[tokio::test]
async fn test_permission_errors_abort_without_notice() {
    let platform = Arc::new(InMemoryPlatform::new(BOT).failing("get_user_role"));

    let result = robot(&platform)
        .handle_event(&comment_event("alice", "/lgtm", &[]), &config(true, false))
        .await;

    assert!(result.is_err());
    assert!(platform.posted_comments().await.is_empty());
}

#[tokio::test]
async fn test_ignored_comments() {
    let platform = Arc::new(InMemoryPlatform::new(BOT).with_role("alice", RepoRole::Write));
    let robot = robot(&platform);

    for body in ["please lgtm", "/lgtmx", "nice work"] {
        let outcome = robot
            .handle_event(&comment_event("alice", body, &[]), &config(true, false))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
    }

    let closed = Event::CommentCreated(CommentEvent {
        pr: pr(&[]),
        pr_state: PrState::Closed,
        commenter: "alice".to_string(),
        body: "/lgtm".to_string(),
    });
    assert_eq!(
        robot.handle_event(&closed, &config(true, false)).await.unwrap(),
        Outcome::Ignored
    );
    assert!(platform.calls().await.is_empty());
}

#[tokio::test]
async fn test_missing_config_is_an_error() {
    let platform = Arc::new(InMemoryPlatform::new(BOT).with_role("alice", RepoRole::Write));
    let config = Configuration {
        config_items: vec![BotConfig::for_repos(["someone-else"])],
    };

    let err = robot(&platform)
        .handle_event(&comment_event("alice", "/lgtm", &[]), &config)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("openeuler/community"));
    assert!(platform.calls().await.is_empty());
}

#[tokio::test]
async fn test_branch_update_without_lgtm_is_noop() {
    let platform = Arc::new(InMemoryPlatform::new(BOT));

    let outcome = robot(&platform)
        .handle_event(&branch_event(&["bug"]), &config(true, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Ignored);
    assert!(platform.calls().await.is_empty());
}

#[tokio::test]
async fn test_branch_update_with_same_tree_keeps_labels() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_pr_labels(&["lgtm-alice"])
            .with_comment(bot_comment(1, &format!("added\n{}", fingerprint_marker("tree1")), false))
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&branch_event(&["lgtm-alice"]), &config(true, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LabelsRetained(vec!["lgtm-alice".to_string()]));
    assert!(platform.pr_labels().await.contains("lgtm-alice"));
}

#[tokio::test]
async fn test_branch_update_with_new_tree_removes_labels() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_pr_labels(&["lgtm-alice", "lgtm-bob", "bug"])
            .with_comment(bot_comment(1, &fingerprint_marker("tree0"), false))
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&branch_event(&["lgtm-alice", "lgtm-bob", "bug"]), &config(true, false))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::LabelsRemoved(vec!["lgtm-alice".to_string(), "lgtm-bob".to_string()])
    );
    assert_eq!(
        platform.pr_labels().await.into_iter().collect::<Vec<_>>(),
        vec!["bug".to_string()]
    );
}

#[tokio::test]
async fn test_edited_fingerprint_is_not_trusted() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_pr_labels(&["lgtm"])
            .with_comment(bot_comment(1, &fingerprint_marker("tree0"), false))
            .with_comment(bot_comment(2, &fingerprint_marker("tree1"), true))
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&branch_event(&["lgtm"]), &config(false, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LabelsRemoved(vec!["lgtm".to_string()]));
}

#[tokio::test]
async fn test_no_fingerprint_removes_labels() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_pr_labels(&["lgtm"])
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&branch_event(&["lgtm"]), &config(false, false))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LabelsRemoved(vec!["lgtm".to_string()]));
    assert!(!platform.was_called("get_commit_tree").await);
}

#[tokio::test]
async fn test_closed_store_sha_always_removes() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_pr_labels(&["lgtm"])
            .with_comment(bot_comment(1, &fingerprint_marker("tree1"), false))
            .with_tree("head1", "tree1"),
    );

    let outcome = robot(&platform)
        .handle_event(&branch_event(&["lgtm"]), &config(false, true))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::LabelsRemoved(vec!["lgtm".to_string()]));
    assert!(!platform.was_called("list_pr_comments").await);
}

#[tokio::test]
async fn test_branch_update_comment_fetch_failure_propagates() {
    let platform = Arc::new(
        InMemoryPlatform::new(BOT)
            .with_pr_labels(&["lgtm"])
            .failing("list_pr_comments"),
    );

    let result = robot(&platform)
        .handle_event(&branch_event(&["lgtm"]), &config(false, false))
        .await;

    assert!(result.is_err());
    assert!(platform.pr_labels().await.contains("lgtm"));
}
