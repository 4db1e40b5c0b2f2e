//! Per-repository bot configuration.
//!
//! The configuration file is YAML with a list of `config_items`; each item
//! applies to the organizations and repositories named in `repos`.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Changed paths must look like `sig/<name>/<anything>` to be judged by
/// subdirectory ownership.
pub const DEFAULT_SIG_PATH_PATTERN: &str = "^sig/[a-zA-Z0-9_-]+/.+";

static DEFAULT_SIG_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_SIG_PATH_PATTERN).expect("default sig path pattern compiles")
});

/// Errors that can occur while loading the bot configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// A compiled path pattern, built once when the configuration is loaded.
#[derive(Debug, Clone)]
pub struct PathPattern(Regex);

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(PathPattern)
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.0.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for PathPattern {
    fn default() -> Self {
        PathPattern(DEFAULT_SIG_PATH.clone())
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        PathPattern::new(&pattern).map_err(|e| {
            serde::de::Error::custom(format!("invalid sig_path_pattern '{}': {}", pattern, e))
        })
    }
}

/// Settings for the repositories one config item covers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    /// `org` or `org/repo` entries this item applies to.
    pub repos: Vec<String>,
    /// `org/repo` entries excluded from an org-wide entry.
    #[serde(default)]
    pub excluded_repos: Vec<String>,
    /// Attach one `lgtm-<login>` label per reviewer instead of a shared `lgtm`.
    #[serde(default)]
    pub multiple_lgtm_label: bool,
    /// Do not record tree fingerprints; every source-branch push clears lgtm.
    #[serde(default)]
    pub close_store_sha: bool,
    /// Repositories (`repo` or `org/repo`) where sig directory owners may approve.
    #[serde(default)]
    pub special_repos: Vec<String>,
    #[serde(default)]
    pub sig_path_pattern: PathPattern,
}

impl BotConfig {
    /// A config item covering `repos` with every option at its default.
    pub fn for_repos<I, S>(repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repos: repos.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_special_repo(&self, org: &str, repo: &str) -> bool {
        let full_name = format!("{}/{}", org, repo);
        self.special_repos
            .iter()
            .any(|r| r == repo || *r == full_name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.repos.is_empty() {
            return Err(ConfigError::InvalidValue(
                "config item must name at least one org or repo in 'repos'".to_string(),
            ));
        }
        if let Some(bad) = self.repos.iter().find(|r| r.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(format!(
                "empty entry '{}' in 'repos'",
                bad
            )));
        }
        Ok(())
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub config_items: Vec<BotConfig>,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config_items.iter().try_for_each(BotConfig::validate)
    }

    /// Find the config item for a repository.
    ///
    /// An item naming `org/repo` exactly wins over one naming only `org`.
    /// Items that exclude `org/repo` never match it.
    pub fn config_for(&self, org: &str, repo: &str) -> Option<&BotConfig> {
        let full_name = format!("{}/{}", org, repo);
        let applicable = || {
            self.config_items
                .iter()
                .filter(|item| !item.excluded_repos.contains(&full_name))
        };

        applicable()
            .find(|item| item.repos.contains(&full_name))
            .or_else(|| applicable().find(|item| item.repos.iter().any(|r| r == org)))
    }
}
