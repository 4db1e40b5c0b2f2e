use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub github_webhook_secret: String,
    /// Base URL of the repository file cache service.
    pub file_cache_endpoint: String,
    /// YAML file with per-repository bot settings.
    pub bot_config_path: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_app_id = env::var("GITHUB_APP_ID")
            .context("GITHUB_APP_ID environment variable is required")?
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;

        let github_private_key = env::var("GITHUB_PRIVATE_KEY")
            .context("GITHUB_PRIVATE_KEY environment variable is required")?
            .replace("\\n", "\n");

        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let file_cache_endpoint = parse_required(env::var("FILE_CACHE_ENDPOINT").ok())
            .context("FILE_CACHE_ENDPOINT environment variable is required")?;

        let bot_config_path = env::var("LGTM_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("lgtm.yaml"));

        let port = parse_port(env::var("PORT").ok())?;

        Ok(Config {
            github_app_id,
            github_private_key,
            github_webhook_secret,
            file_cache_endpoint,
            bot_config_path,
            port,
        })
    }
}

/// Treat a missing, empty, or whitespace-only value as absent.
pub fn parse_required(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

pub fn parse_port(value: Option<String>) -> Result<u16> {
    value
        .unwrap_or_else(|| "3000".to_string())
        .parse::<u16>()
        .context("PORT must be a valid number")
}
