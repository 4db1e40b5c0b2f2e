use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Method, Response, StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info};

use lgtm_core::{PlatformClient, PrComment, PrState, RepoRole};

use crate::http::{create_http_client, CORRELATION_ID_HEADER};

const API_ROOT: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
const LABEL_COLOR: &str = "0e8a16";

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
    bot_login: Arc<OnceCell<String>>,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct AppInfoResponse {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: String,
}

#[derive(Debug, Deserialize)]
struct FileContentsResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
    /// Set for renames; the old path is touched too.
    #[serde(default)]
    previous_filename: Option<String>,
}

/// Every path a PR touches, including the source side of renames.
fn changed_paths(files: Vec<PullRequestFile>) -> Vec<String> {
    files
        .into_iter()
        .flat_map(|f| std::iter::once(f.filename).chain(f.previous_filename))
        .collect()
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
    body: Option<String>,
    user: UserResponse,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: TreeResponse,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    pub user: PullRequestUser,
    pub head: PullRequestRefResponse,
    pub base: PullRequestRefResponse,
    #[serde(default)]
    pub labels: Vec<PullRequestLabel>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRefResponse {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestLabel {
    pub name: String,
}

impl PullRequestResponse {
    pub fn pr_state(&self) -> PrState {
        PrState::from_platform(&self.state, self.merged)
    }
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Self {
        Self {
            client: create_http_client("lgtm-bot/0.1.0"),
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
            bot_login: Arc::new(OnceCell::new()),
        }
    }

    /// A `PlatformClient` acting as one installation of the app.
    pub fn for_installation(
        self: &Arc<Self>,
        installation_id: u64,
        correlation_id: Option<String>,
    ) -> InstallationClient {
        InstallationClient {
            github: self.clone(),
            installation_id,
            correlation_id,
        }
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Reuse the cached token while it has more than 5 minutes left
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            API_ROOT, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send installation token request")?;
        let response = error_for_status(response, "requesting installation token").await?;

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);
        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp().max(0) as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }

    async fn fetch_bot_login(&self) -> Result<String> {
        let jwt = self.generate_jwt()?;
        let response = self
            .client
            .get(format!("{}/app", API_ROOT))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send app info request")?;
        let response = error_for_status(response, "fetching app info").await?;

        let app_info: AppInfoResponse = response
            .json()
            .await
            .context("Failed to parse app info response")?;
        Ok(format!("{}[bot]", app_info.slug))
    }
}

/// Turn a non-success response into an error carrying the body.
async fn error_for_status(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response
        .text()
        .await
        .context("Failed to read error response body")?;
    error!("GitHub API error {}: {} - {}", what, status, error_text);
    Err(anyhow!(
        "GitHub API error {}: {} - {}",
        what,
        status,
        error_text
    ))
}

/// Labels left on a PR once `remove` is taken off `current`, or `None` when
/// none of `remove` is attached.
fn labels_after_removal(current: &[String], remove: &[String]) -> Option<Vec<String>> {
    if !current.iter().any(|l| remove.contains(l)) {
        return None;
    }
    Some(
        current
            .iter()
            .filter(|l| !remove.contains(l))
            .cloned()
            .collect(),
    )
}

fn repo_url(org: &str, repo: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(API_ROOT).context("Invalid GitHub API root")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("GitHub API root cannot be a base URL"))?
        .extend(["repos", org, repo])
        .extend(segments);
    Ok(url)
}

/// GitHub access scoped to one app installation and one webhook delivery.
#[derive(Clone)]
pub struct InstallationClient {
    github: Arc<GitHubClient>,
    installation_id: u64,
    correlation_id: Option<String>,
}

impl InstallationClient {
    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self
            .github
            .get_installation_token(self.installation_id)
            .await?;

        let mut request_builder = self
            .github
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json");

        if let Some(cid) = &self.correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }

        Ok(request_builder)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        let response = self
            .request(Method::GET, url)
            .await?
            .send()
            .await
            .with_context(|| format!("Failed to send request {}", what))?;
        let response = error_for_status(response, what).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response {}", what))
    }

    /// Fetch every page of a list endpoint.
    async fn get_all_pages<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let items: Vec<T> = self.get_json(page_url, what).await?;
            let count = items.len();
            all.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    pub async fn get_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestResponse> {
        let url = repo_url(org, repo, &["pulls", number.to_string().as_str()])?;
        info!("Fetching PR #{} from {}/{}", number, org, repo);

        let pr: PullRequestResponse = self.get_json(url, "fetching pull request").await?;
        info!(
            "Successfully fetched PR #{} (head: {}, base: {})",
            pr.number, pr.head.sha, pr.base.ref_name
        );
        Ok(pr)
    }

    async fn post_json(&self, url: Url, body: serde_json::Value, what: &str) -> Result<Response> {
        self.request(Method::POST, url)
            .await?
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&body)?)
            .send()
            .await
            .with_context(|| format!("Failed to send request {}", what))
    }
}

#[async_trait]
impl PlatformClient for InstallationClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn bot_login(&self) -> Result<String> {
        self.github
            .bot_login
            .get_or_try_init(|| self.github.fetch_bot_login())
            .await
            .cloned()
    }

    async fn get_user_role(&self, org: &str, repo: &str, login: &str) -> Result<RepoRole> {
        let url = repo_url(org, repo, &["collaborators", login, "permission"])?;
        let response = self
            .request(Method::GET, url)
            .await?
            .send()
            .await
            .context("Failed to send permission request")?;

        // Unknown users are reported as 404 rather than "none".
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(RepoRole::None);
        }
        let response = error_for_status(response, "fetching permission").await?;

        let permission: PermissionResponse = response
            .json()
            .await
            .context("Failed to parse permission response")?;
        info!(
            "{} has {} permission on {}/{}",
            login, permission.permission, org, repo
        );
        Ok(RepoRole::from_permission(&permission.permission))
    }

    async fn get_path_content(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/'));
        let mut url = repo_url(org, repo, &segments)?;
        url.query_pairs_mut().append_pair("ref", git_ref);

        info!("Fetching file contents: {} at {}", path, git_ref);
        let response = self
            .request(Method::GET, url)
            .await?
            .send()
            .await
            .context("Failed to send file contents request")?;

        if response.status() == StatusCode::NOT_FOUND {
            info!("{} does not exist at {}", path, git_ref);
            return Ok(None);
        }
        let response = error_for_status(response, "fetching file").await?;

        let file: FileContentsResponse = response
            .json()
            .await
            .context("Failed to parse file contents response")?;
        Ok(Some(file.content))
    }

    async fn list_pr_changed_files(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<String>> {
        let url = repo_url(org, repo, &["pulls", number.to_string().as_str(), "files"])?;
        let files: Vec<PullRequestFile> = self
            .get_all_pages(url, "listing pull request files")
            .await?;

        info!("Found {} changed files on PR #{}", files.len(), number);
        Ok(changed_paths(files))
    }

    async fn add_pr_label(&self, org: &str, repo: &str, number: u64, label: &str) -> Result<()> {
        let url = repo_url(org, repo, &["issues", number.to_string().as_str(), "labels"])?;
        let response = self
            .post_json(url, json!({ "labels": [label] }), "adding label")
            .await?;
        error_for_status(response, "adding label").await?;

        info!("Added label {} to PR #{}", label, number);
        Ok(())
    }

    async fn remove_pr_label(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<()> {
        let url = repo_url(org, repo, &["issues", number.to_string().as_str(), "labels", label])?;
        let response = self
            .request(Method::DELETE, url)
            .await?
            .send()
            .await
            .context("Failed to send remove label request")?;

        // Removing a label that is not attached is not an error.
        if response.status() == StatusCode::NOT_FOUND {
            info!("Label {} was not on PR #{}", label, number);
            return Ok(());
        }
        error_for_status(response, "removing label").await?;

        info!("Removed label {} from PR #{}", label, number);
        Ok(())
    }

    async fn remove_pr_labels(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<()> {
        let url = repo_url(org, repo, &["issues", number.to_string().as_str(), "labels"])?;
        let current: Vec<LabelResponse> = self
            .get_all_pages(url.clone(), "listing pull request labels")
            .await?;
        let current: Vec<String> = current.into_iter().map(|l| l.name).collect();

        let Some(kept) = labels_after_removal(&current, labels) else {
            info!("None of {:?} are on PR #{}", labels, number);
            return Ok(());
        };

        // One PUT replaces the whole set, so a failure leaves every label in place.
        let response = self
            .request(Method::PUT, url)
            .await?
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&json!({ "labels": kept }))?)
            .send()
            .await
            .context("Failed to send replace labels request")?;
        error_for_status(response, "replacing labels").await?;

        info!("Removed {:?} from PR #{}", labels, number);
        Ok(())
    }

    async fn list_repo_labels(&self, org: &str, repo: &str) -> Result<Vec<String>> {
        let url = repo_url(org, repo, &["labels"])?;
        let labels: Vec<LabelResponse> = self
            .get_all_pages(url, "listing repository labels")
            .await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn create_repo_label(&self, org: &str, repo: &str, label: &str) -> Result<()> {
        let url = repo_url(org, repo, &["labels"])?;
        let response = self
            .post_json(
                url,
                json!({ "name": label, "color": LABEL_COLOR }),
                "creating label",
            )
            .await?;

        // 422 means the label already exists.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(());
        }
        error_for_status(response, "creating label").await?;
        Ok(())
    }

    async fn create_pr_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<()> {
        let url = repo_url(org, repo, &["issues", number.to_string().as_str(), "comments"])?;
        info!("Posting comment to PR #{} in {}/{}", number, org, repo);

        let response = self
            .post_json(url, json!({ "body": body }), "posting comment")
            .await?;
        error_for_status(response, "posting comment").await?;
        Ok(())
    }

    async fn list_pr_comments(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<PrComment>> {
        let url = repo_url(org, repo, &["issues", number.to_string().as_str(), "comments"])?;
        let comments: Vec<CommentResponse> = self
            .get_all_pages(url, "listing comments")
            .await?;

        info!(
            "Found {} total comments on PR #{}",
            comments.len(),
            number
        );
        Ok(comments
            .into_iter()
            .map(|c| PrComment {
                id: c.id,
                author: c.user.login,
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect())
    }

    async fn get_commit_tree(&self, org: &str, repo: &str, sha: &str) -> Result<String> {
        let url = repo_url(org, repo, &["git", "commits", sha])?;
        let commit: CommitResponse = self.get_json(url, "fetching commit").await?;
        Ok(commit.tree.sha)
    }
}
