//! Inbound events, one variant per kind of webhook the bot acts on.

use std::collections::BTreeSet;

/// Snapshot of a pull request at the time of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestContext {
    pub org: String,
    pub repo: String,
    pub number: u64,
    pub author: String,
    /// Head commit; for a branch update this is the new head.
    pub head_sha: String,
    pub base_ref: String,
    pub labels: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    /// Parse a platform state string; anything unrecognized counts as closed.
    pub fn from_platform(state: &str, merged: bool) -> Self {
        if merged {
            return PrState::Merged;
        }
        match state.to_ascii_lowercase().as_str() {
            "open" | "opened" => PrState::Open,
            "merged" => PrState::Merged,
            _ => PrState::Closed,
        }
    }
}

/// A comment was created on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub pr: PullRequestContext,
    pub pr_state: PrState,
    pub commenter: String,
    pub body: String,
}

/// New commits were pushed to a pull request's source branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchUpdateEvent {
    pub pr: PullRequestContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CommentCreated(CommentEvent),
    BranchUpdated(BranchUpdateEvent),
}

impl Event {
    pub fn pull_request(&self) -> &PullRequestContext {
        match self {
            Event::CommentCreated(e) => &e.pr,
            Event::BranchUpdated(e) => &e.pr,
        }
    }
}
