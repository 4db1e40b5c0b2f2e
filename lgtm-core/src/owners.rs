//! Decoding of `OWNERS` files into sets of authorized logins.
//!
//! An `OWNERS` file is a YAML document with optional `maintainers` and
//! `committers` lists. Both lists grant approval rights. The payload arrives
//! base64-encoded, as the contents APIs return it.
//!
//! Decoding never fails: a corrupt file yields an empty record so the caller
//! denies rather than aborts.

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::error;

#[derive(Debug, Default, Deserialize)]
struct OwnersFile {
    #[serde(default)]
    maintainers: Vec<String>,
    #[serde(default)]
    committers: Vec<String>,
}

/// Normalize a login for comparison.
pub fn normalize_login(login: &str, case_insensitive: bool) -> String {
    let trimmed = login.trim();
    if case_insensitive {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// The set of logins one `OWNERS` file authorizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipRecord {
    identities: BTreeSet<String>,
    case_insensitive: bool,
}

impl OwnershipRecord {
    pub fn new<I, S>(identities: I, case_insensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identities = identities
            .into_iter()
            .map(|login| normalize_login(login.as_ref(), case_insensitive))
            .filter(|login| !login.is_empty())
            .collect();
        Self {
            identities,
            case_insensitive,
        }
    }

    pub fn empty(case_insensitive: bool) -> Self {
        Self {
            identities: BTreeSet::new(),
            case_insensitive,
        }
    }

    pub fn contains(&self, login: &str) -> bool {
        self.identities
            .contains(&normalize_login(login, self.case_insensitive))
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Logins in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(String::as_str)
    }
}

/// Decode a base64 `OWNERS` payload.
///
/// Embedded newlines (the contents API wraps base64 at 60 columns) are
/// ignored. Any decode or parse failure is logged and produces an empty
/// record.
pub fn decode_owners(content: &str, case_insensitive: bool) -> OwnershipRecord {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = match general_purpose::STANDARD.decode(compact) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to decode OWNERS file: {}", e);
            return OwnershipRecord::empty(case_insensitive);
        }
    };

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            error!("OWNERS file is not valid UTF-8: {}", e);
            return OwnershipRecord::empty(case_insensitive);
        }
    };

    // An empty document is a valid file with no owners.
    if text.trim().is_empty() {
        return OwnershipRecord::empty(case_insensitive);
    }

    let file: OwnersFile = match serde_yaml::from_str(&text) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to parse OWNERS yaml: {}", e);
            return OwnershipRecord::empty(case_insensitive);
        }
    };

    OwnershipRecord::new(
        file.maintainers.iter().chain(file.committers.iter()),
        case_insensitive,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(yaml: &str) -> String {
        general_purpose::STANDARD.encode(yaml)
    }

    #[test]
    fn test_maintainers_and_committers_are_unioned() {
        let payload = encode("maintainers:\n  - alice\n  - bob\ncommitters:\n  - carol\n  - bob\n");
        let owners = decode_owners(&payload, true);

        assert_eq!(owners.iter().collect::<Vec<_>>(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let only_maintainers = decode_owners(&encode("maintainers:\n  - alice\n"), true);
        assert_eq!(only_maintainers.len(), 1);
        assert!(only_maintainers.contains("alice"));

        let only_committers = decode_owners(&encode("committers:\n  - dave\n"), true);
        assert!(only_committers.contains("dave"));

        let neither = decode_owners(&encode("reviewers:\n  - erin\n"), true);
        assert!(neither.is_empty());
    }

    #[test]
    fn test_case_insensitive_matching() {
        let owners = decode_owners(&encode("maintainers:\n  - Alice\n"), true);
        assert!(owners.contains("alice"));
        assert!(owners.contains("ALICE"));

        let strict = decode_owners(&encode("maintainers:\n  - Alice\n"), false);
        assert!(strict.contains("Alice"));
        assert!(!strict.contains("alice"));
    }

    #[test]
    fn test_wrapped_base64_is_accepted() {
        let payload = encode("maintainers:\n  - alice\n  - bob\n  - carol\n  - dave\n");
        let wrapped = payload
            .as_bytes()
            .chunks(16)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");

        let owners = decode_owners(&wrapped, true);
        assert_eq!(owners.len(), 4);
    }

    #[test]
    fn test_bad_base64_yields_empty_set() {
        let owners = decode_owners("!!!not base64!!!", true);
        assert!(owners.is_empty());
    }

    #[test]
    fn test_malformed_yaml_yields_empty_set() {
        let owners = decode_owners(&encode("maintainers: [alice\n  - : :"), true);
        assert!(owners.is_empty());

        let wrong_shape = decode_owners(&encode("maintainers: alice\n"), true);
        assert!(wrong_shape.is_empty());
    }

    #[test]
    fn test_empty_file_yields_empty_set() {
        assert!(decode_owners("", true).is_empty());
        assert!(decode_owners(&encode("\n"), true).is_empty());
    }
}
