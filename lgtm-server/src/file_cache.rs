//! Client for the repository file cache service.
//!
//! The cache indexes files by name across a branch's tree, so all sig
//! `OWNERS` files come back from a single request.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::Deserialize;
use tracing::{error, info};

use lgtm_core::{BranchRef, CachedFile, OwnersCache};

use crate::http::{create_http_client, CORRELATION_ID_HEADER};

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    path: String,
    #[serde(default)]
    content: String,
}

#[derive(Clone)]
pub struct FileCacheClient {
    client: ClientWithMiddleware,
    endpoint: Url,
    correlation_id: Option<String>,
}

impl FileCacheClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("Invalid file cache endpoint: {}", endpoint))?;
        Ok(Self {
            client: create_http_client("lgtm-bot/0.1.0"),
            endpoint,
            correlation_id: None,
        })
    }

    /// A copy of this client that tags its requests with `correlation_id`.
    pub fn for_correlation_id(&self, correlation_id: String) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..self.clone()
        }
    }

    fn files_request(&self, url: Url) -> RequestBuilder {
        let request_builder = self.client.get(url);
        match &self.correlation_id {
            Some(cid) => request_builder.header(CORRELATION_ID_HEADER, cid),
            None => request_builder,
        }
    }

    fn files_url(&self, branch: &BranchRef, file_name: &str, recursive: bool) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("File cache endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend([
                "v1",
                "file",
                branch.platform.as_str(),
                branch.org.as_str(),
                branch.repo.as_str(),
                branch.branch.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("path", file_name)
            .append_pair("recursive", if recursive { "true" } else { "false" });
        Ok(url)
    }
}

#[async_trait]
impl OwnersCache for FileCacheClient {
    async fn get_files(
        &self,
        branch: &BranchRef,
        file_name: &str,
        recursive: bool,
    ) -> Result<Vec<CachedFile>> {
        let url = self.files_url(branch, file_name, recursive)?;
        info!(
            "Fetching cached {} files for {}/{}@{}",
            file_name, branch.org, branch.repo, branch.branch
        );

        let response = self
            .files_request(url)
            .send()
            .await
            .context("Failed to send file cache request")?;

        // The cache answers 404 for branches it has not indexed.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("File cache error: {} - {}", status, error_text);
            return Err(anyhow!("File cache error: {} - {}", status, error_text));
        }

        let files: FilesResponse = response
            .json()
            .await
            .context("Failed to parse file cache response")?;

        info!("File cache returned {} files", files.files.len());
        Ok(files
            .files
            .into_iter()
            .map(|f| CachedFile {
                path: f.path,
                content: f.content,
            })
            .collect())
    }
}
