/// Command parsing for `/lgtm` comments
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static ADD_LGTM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^/lgtm\s*$").expect("add pattern compiles"));

static REMOVE_LGTM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^/lgtm cancel\s*$").expect("remove pattern compiles"));

/// An actionable lgtm command found in a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LgtmCommand {
    /// Attach the reviewer's lgtm label
    Add,
    /// Detach the reviewer's lgtm label (or all of them, for the PR author)
    Remove,
}

impl fmt::Display for LgtmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LgtmCommand::Add => write!(f, "add"),
            LgtmCommand::Remove => write!(f, "remove"),
        }
    }
}

/// Classify a comment body.
///
/// Both commands must sit alone on their own line; the keyword is matched
/// case-insensitively and trailing whitespace is allowed. The add form is
/// checked first, so a comment carrying both lines adds.
pub fn parse_comment(body: &str) -> Option<LgtmCommand> {
    if ADD_LGTM.is_match(body) {
        Some(LgtmCommand::Add)
    } else if REMOVE_LGTM.is_match(body) {
        Some(LgtmCommand::Remove)
    } else {
        None
    }
}
