//! Coveo Search API client.
//!
//! A single call, `POST <client_uri>/rest/search/v2`, with a bearer token.
//! The response body is parsed as JSON whatever the status so that a
//! non-success response can be handed back to the caller as data instead of
//! an error. The orchestrator relies on this to spot an expired token
//! (HTTP 419) and retry.
//!
//! Transport failures and unparseable bodies are still errors. A successful
//! body is handed back as parsed, whatever its shape.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::endpoint::SessionEndpoint;
use crate::models::SearchResponse;

/// Search API path, relative to the client URI.
pub const SEARCH_PATH: &str = "/rest/search/v2";

/// Status Coveo returns when the search token has expired.
pub const TOKEN_EXPIRED_STATUS: u16 = 419;

/// What a search call came back with.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Success(SearchResponse),
    /// Non-2xx response with its parsed error body.
    Failed { status: u16, body: Value },
}

impl SearchOutcome {
    pub fn status(&self) -> u16 {
        match self {
            SearchOutcome::Success(_) => 200,
            SearchOutcome::Failed { status, .. } => *status,
        }
    }

    pub fn is_token_expired(&self) -> bool {
        matches!(self, SearchOutcome::Failed { status, .. } if *status == TOKEN_EXPIRED_STATUS)
    }
}

/// Execute a query.
///
/// `query_body` is sent as-is; it must at least carry `q`.
pub async fn execute_query(
    http: &reqwest::Client,
    session: &SessionEndpoint,
    query_body: &Value,
) -> Result<SearchOutcome> {
    let url = format!("{}{}", session.client_uri(), SEARCH_PATH);
    debug!(%url, "executing search query");

    let response = http
        .post(&url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .header("Authorization", format!("Bearer {}", session.token()))
        .json(query_body)
        .send()
        .await
        .with_context(|| format!("Search API unreachable at {}", url))?;

    let status = response.status();
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text)
        .with_context(|| format!("Search API returned invalid JSON (HTTP {})", status))?;

    if !status.is_success() {
        warn!(status = status.as_u16(), "search query failed");
        return Ok(SearchOutcome::Failed {
            status: status.as_u16(),
            body,
        });
    }

    Ok(SearchOutcome::Success(SearchResponse::from(body)))
}
