//! Tree fingerprints hidden in lgtm comments.
//!
//! When the bot adds lgtm it records the head commit's tree in an HTML comment.
//! On a later push, the newest unedited bot comment carrying a fingerprint tells
//! us whether the code the reviewer saw is still the code on the branch.

use regex::Regex;
use std::sync::LazyLock;

use crate::owners::normalize_login;
use crate::platform::PrComment;

static FINGERPRINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!-- lgtm-tree: ([0-9A-Za-z]+) -->").expect("fingerprint pattern compiles")
});

/// Hidden marker recording `tree`.
pub fn fingerprint_marker(tree: &str) -> String {
    format!("<!-- lgtm-tree: {} -->", tree)
}

/// Pull a fingerprint out of a comment body.
pub fn extract_fingerprint(body: &str) -> Option<&str> {
    FINGERPRINT
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Newest fingerprint recorded by the bot.
///
/// `comments` must be oldest first. Comments by anyone other than the bot, and
/// bot comments that have been edited since creation, are skipped.
pub fn latest_fingerprint(
    comments: &[PrComment],
    bot_login: &str,
    case_insensitive: bool,
) -> Option<String> {
    let bot = normalize_login(bot_login, case_insensitive);

    comments
        .iter()
        .rev()
        .filter(|c| normalize_login(&c.author, case_insensitive) == bot)
        .filter(|c| !c.is_edited())
        .find_map(|c| extract_fingerprint(&c.body).map(str::to_string))
}
