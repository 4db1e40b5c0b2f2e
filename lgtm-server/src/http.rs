//! Outbound HTTP client shared by the GitHub and file cache clients.

use std::time::Instant;

use axum::http;
use reqwest::{Client, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, Result};
use tracing::{info, warn};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Identifier tying every outbound call to the webhook delivery that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        CorrelationId(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamps a correlation id on each request and logs its outcome.
pub struct TracingMiddleware;

#[async_trait::async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let correlation_id = match req.headers().get(CORRELATION_ID_HEADER) {
            Some(value) => value.to_str().unwrap_or("invalid").to_string(),
            None => {
                let id = extensions
                    .get::<CorrelationId>()
                    .cloned()
                    .unwrap_or_default();
                if let Ok(value) = id.0.parse() {
                    req.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                id.0
            }
        };

        let method = req.method().clone();
        let url = req.url().clone();
        let started = Instant::now();

        let response = next.run(req, extensions).await;

        let elapsed_ms = started.elapsed().as_millis();
        match &response {
            Ok(resp) => info!(
                correlation_id = %correlation_id,
                "{} {} -> {} ({} ms)",
                method,
                url,
                resp.status(),
                elapsed_ms
            ),
            Err(e) => warn!(
                correlation_id = %correlation_id,
                "{} {} failed after {} ms: {}",
                method,
                url,
                elapsed_ms,
                e
            ),
        }

        response
    }
}

pub fn create_http_client(user_agent: &str) -> ClientWithMiddleware {
    let client = Client::builder()
        .user_agent(user_agent)
        .build()
        .expect("Failed to create HTTP client");

    ClientBuilder::new(client).with(TracingMiddleware).build()
}
