//! Naming of lgtm labels.

/// The shared lgtm label, and the prefix of per-reviewer labels.
pub const LGTM_LABEL: &str = "lgtm";

/// Longest label name the platform accepts.
pub const LABEL_LEN_LIMIT: usize = 20;

/// The label an lgtm from `login` attaches.
///
/// With `multiple` unset every reviewer shares `lgtm`. Otherwise the label is
/// `lgtm-<login>` lowercased and cut to [`LABEL_LEN_LIMIT`] characters.
pub fn lgtm_label_for(login: &str, multiple: bool) -> String {
    if !multiple {
        return LGTM_LABEL.to_string();
    }

    format!("{}-{}", LGTM_LABEL, login.trim().to_lowercase())
        .chars()
        .take(LABEL_LEN_LIMIT)
        .collect()
}

/// Whether a label was attached by an lgtm command.
pub fn is_lgtm_label(label: &str) -> bool {
    label == LGTM_LABEL
        || label
            .strip_prefix(LGTM_LABEL)
            .is_some_and(|rest| rest.starts_with('-'))
}

/// The lgtm labels among `labels`, sorted.
pub fn lgtm_labels_on<'a, I>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut found: Vec<String> = labels
        .into_iter()
        .filter(|l| is_lgtm_label(l))
        .cloned()
        .collect();
    found.sort();
    found.dedup();
    found
}
