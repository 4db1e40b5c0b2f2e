pub mod config;
pub mod file_cache;
pub mod github;
pub mod http;
pub mod webhook;

use std::sync::Arc;

use lgtm_core::Configuration;

pub use file_cache::FileCacheClient;
pub use github::{GitHubClient, InstallationClient};
pub use http::{CorrelationId, CORRELATION_ID_HEADER};

pub struct AppState {
    pub github_client: Arc<GitHubClient>,
    pub file_cache: Arc<FileCacheClient>,
    pub webhook_secret: String,
    /// Loaded once at startup and never mutated.
    pub bot_config: Arc<Configuration>,
}
