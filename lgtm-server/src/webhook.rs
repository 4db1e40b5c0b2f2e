use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

use lgtm_core::{
    parse_comment, BranchUpdateEvent, CommentEvent, Event, PullRequestContext, Robot,
};

use crate::{AppState, CorrelationId};

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
    pub installation: Option<Installation>,
    pub comment: Option<Comment>,
    pub issue: Option<Issue>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    #[serde(default)]
    pub body: Option<String>,
    pub user: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: u64,
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestLink {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub user: User,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

/// What a webhook delivery asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A new comment carrying an lgtm command. The PR itself still has to be
    /// fetched, since comment payloads lack the head commit and base ref.
    Comment {
        installation_id: u64,
        org: String,
        repo: String,
        number: u64,
        commenter: String,
        body: String,
    },
    /// New commits on a PR's source branch.
    BranchUpdate {
        installation_id: u64,
        event: BranchUpdateEvent,
    },
    Ignored(String),
}

/// Decide what a delivery is, from the `X-GitHub-Event` name and payload.
pub fn classify_delivery(event_name: &str, payload: &GitHubWebhookPayload) -> Delivery {
    let (Some(repo), Some(installation)) = (&payload.repository, &payload.installation) else {
        return Delivery::Ignored("missing repository or installation".to_string());
    };

    match (event_name, payload.action.as_deref()) {
        ("issue_comment", Some("created")) => {
            let (Some(comment), Some(issue)) = (&payload.comment, &payload.issue) else {
                return Delivery::Ignored("comment event missing comment or issue".to_string());
            };
            if issue.pull_request.is_none() {
                return Delivery::Ignored("comment is on an issue, not a PR".to_string());
            }
            let body = comment.body.clone().unwrap_or_default();
            if parse_comment(&body).is_none() {
                return Delivery::Ignored("comment has no lgtm command".to_string());
            }

            Delivery::Comment {
                installation_id: installation.id,
                org: repo.owner.login.clone(),
                repo: repo.name.clone(),
                number: issue.number,
                commenter: comment.user.login.clone(),
                body,
            }
        }
        ("pull_request", Some("synchronize")) => {
            let Some(pr) = &payload.pull_request else {
                return Delivery::Ignored("synchronize event missing pull request".to_string());
            };

            Delivery::BranchUpdate {
                installation_id: installation.id,
                event: BranchUpdateEvent {
                    pr: PullRequestContext {
                        org: repo.owner.login.clone(),
                        repo: repo.name.clone(),
                        number: pr.number,
                        author: pr.user.login.clone(),
                        head_sha: pr.head.sha.clone(),
                        base_ref: pr.base.ref_name.clone(),
                        labels: pr.labels.iter().map(|l| l.name.clone()).collect(),
                    },
                },
            }
        }
        (name, action) => Delivery::Ignored(format!("{} event with action {:?}", name, action)),
    }
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(CorrelationId::new());

    Ok(next.run(new_request).await)
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .cloned()
        .unwrap_or_default();

    let (parts, body) = request.into_parts();
    let event_name = parts
        .headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let payload: GitHubWebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    info!(
        correlation_id = %correlation_id.0,
        "Received {} webhook in {}",
        event_name,
        payload
            .repository
            .as_ref()
            .map(|r| r.full_name.as_str())
            .unwrap_or("unknown")
    );

    match classify_delivery(&event_name, &payload) {
        Delivery::Ignored(reason) => {
            info!("Ignoring webhook: {}", reason);
        }
        delivery => {
            tokio::spawn(async move {
                if let Err(e) = process_delivery(state, correlation_id.clone(), delivery).await {
                    error!(
                        correlation_id = %correlation_id.0,
                        "Failed to process webhook: {:#}",
                        e
                    );
                }
            });
        }
    }

    Ok(Json(WebhookResponse {
        message: "Webhook received".to_string(),
    }))
}

async fn process_delivery(
    state: Arc<AppState>,
    correlation_id: CorrelationId,
    delivery: Delivery,
) -> anyhow::Result<()> {
    let installation_id = match &delivery {
        Delivery::Comment {
            installation_id, ..
        }
        | Delivery::BranchUpdate {
            installation_id, ..
        } => *installation_id,
        Delivery::Ignored(_) => return Ok(()),
    };
    let client = state
        .github_client
        .for_installation(installation_id, Some(correlation_id.0.clone()));

    let event = match delivery {
        Delivery::Comment {
            org,
            repo,
            number,
            commenter,
            body,
            ..
        } => {
            let pr = client.get_pull_request(&org, &repo, number).await?;
            Event::CommentCreated(CommentEvent {
                pr_state: pr.pr_state(),
                pr: PullRequestContext {
                    org,
                    repo,
                    number,
                    author: pr.user.login,
                    head_sha: pr.head.sha,
                    base_ref: pr.base.ref_name,
                    labels: pr
                        .labels
                        .into_iter()
                        .map(|l| l.name)
                        .collect::<BTreeSet<_>>(),
                },
                commenter,
                body,
            })
        }
        Delivery::BranchUpdate { event, .. } => Event::BranchUpdated(event),
        Delivery::Ignored(_) => return Ok(()),
    };

    let file_cache = state
        .file_cache
        .for_correlation_id(correlation_id.0.clone());
    let robot = Robot::new(Arc::new(client), Arc::new(file_cache));
    let outcome = robot.handle_event(&event, &state.bot_config).await?;

    let pr = event.pull_request();
    info!(
        correlation_id = %correlation_id.0,
        "PR #{} in {}/{}: {:?}",
        pr.number,
        pr.org,
        pr.repo,
        outcome
    );
    Ok(())
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}
