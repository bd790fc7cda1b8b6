//! Coveo Usage Analytics client.
//!
//! Three events share one protocol:
//!
//! | Event | Path | Fixed fields |
//! |-------|------|--------------|
//! | search | `/search` | `numberOfResults`, `responseTime`, `searchQueryUid`, `queryPipeline` |
//! | click | `/click` | `documentUri`, `documentUriHash`, `sourceName`, `documentTitle`, `documentUrl`, `contentIDKey`, `contentIDValue` |
//! | custom | `/custom` | none |
//!
//! Caller-supplied fields are merged over the fixed ones, so a caller can
//! override any of them. The visitor id is resolved through
//! [`VisitorIdentity::resolve`] and sent as `?visitor=<id>`; whatever id the
//! server returns is persisted for the next event.
//!
//! # Failure policy
//!
//! Analytics is best-effort. A transport error, a non-success status, or an
//! unreadable body is logged at `warn` and turned into an empty
//! [`AnalyticsResponse`]. None of the `log_*` functions can fail, so an
//! analytics outage never interrupts search or click handling.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::endpoint::SessionEndpoint;
use crate::models::{SearchResponse, SearchResult};
use crate::visitor::VisitorIdentity;

pub const SEARCH_EVENT_PATH: &str = "/search";
pub const CLICK_EVENT_PATH: &str = "/click";
pub const CUSTOM_EVENT_PATH: &str = "/custom";

/// Value of `contentIDKey` on click events.
pub const CONTENT_ID_KEY: &str = "@permanentid";

/// Parsed analytics response. Empty when the call failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalyticsResponse {
    pub fn is_empty(&self) -> bool {
        self.visitor_id.is_none() && self.extra.is_empty()
    }
}

/// Analytics sender. Cheap to clone, so it can be moved into spawned tasks.
#[derive(Clone)]
pub struct AnalyticsClient {
    http: reqwest::Client,
    visitor: VisitorIdentity,
}

impl AnalyticsClient {
    pub fn new(http: reqwest::Client, visitor: VisitorIdentity) -> Self {
        Self { http, visitor }
    }

    /// Client with its own HTTP connection pool and request timeout.
    pub fn with_timeout(visitor: VisitorIdentity, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self::new(http, visitor))
    }

    pub fn visitor(&self) -> &VisitorIdentity {
        &self.visitor
    }

    /// Log a search event describing `response`.
    pub async fn log_search_event(
        &self,
        session: &SessionEndpoint,
        response: &SearchResponse,
        additional: Map<String, Value>,
        visitor_override: Option<&str>,
    ) -> AnalyticsResponse {
        let body = search_event_body(response, additional);
        self.send_event(session, SEARCH_EVENT_PATH, body, visitor_override)
            .await
    }

    /// Log a click on `result`.
    pub async fn log_click_event(
        &self,
        session: &SessionEndpoint,
        result: &SearchResult,
        additional: Map<String, Value>,
        visitor_override: Option<&str>,
    ) -> AnalyticsResponse {
        let body = click_event_body(result, additional);
        self.send_event(session, CLICK_EVENT_PATH, body, visitor_override)
            .await
    }

    /// Log a custom event; the body is exactly `fields`.
    pub async fn log_custom_event(
        &self,
        session: &SessionEndpoint,
        fields: Map<String, Value>,
        visitor_override: Option<&str>,
    ) -> AnalyticsResponse {
        self.send_event(session, CUSTOM_EVENT_PATH, fields, visitor_override)
            .await
    }

    async fn send_event(
        &self,
        session: &SessionEndpoint,
        path: &str,
        body: Map<String, Value>,
        visitor_override: Option<&str>,
    ) -> AnalyticsResponse {
        let visitor_id = self.visitor.resolve(visitor_override);
        match self.post_event(session, path, &body, visitor_id.as_deref()).await {
            Ok(response) => {
                if let Some(id) = response.visitor_id.as_deref() {
                    if let Err(e) = self.visitor.set(id) {
                        warn!(error = %e, "failed to persist visitor id");
                    }
                }
                response
            }
            Err(e) => {
                warn!(event = path, error = %e, "analytics event dropped");
                AnalyticsResponse::default()
            }
        }
    }

    async fn post_event(
        &self,
        session: &SessionEndpoint,
        path: &str,
        body: &Map<String, Value>,
        visitor_id: Option<&str>,
    ) -> Result<AnalyticsResponse> {
        let url = event_url(session, path, visitor_id)?;
        debug!(event = path, has_visitor = visitor_id.is_some(), "sending analytics event");

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", session.token()))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Analytics API error {}: {}", status, text);
        }

        let parsed = response
            .json::<AnalyticsResponse>()
            .await
            .context("Analytics API returned invalid JSON")?;
        Ok(parsed)
    }
}

/// `<analytics_uri><path>[?visitor=<id>]`, with the id percent-encoded.
pub fn event_url(
    session: &SessionEndpoint,
    path: &str,
    visitor_id: Option<&str>,
) -> Result<reqwest::Url> {
    let raw = format!("{}{}", session.analytics_uri(), path);
    let mut url =
        reqwest::Url::parse(&raw).with_context(|| format!("Invalid analytics URL: {}", raw))?;
    if let Some(id) = visitor_id {
        url.query_pairs_mut().append_pair("visitor", id);
    }
    Ok(url)
}

/// Merge `additional` over `fixed`; on a key collision `additional` wins.
pub fn merge_fields(
    mut fixed: Map<String, Value>,
    additional: Map<String, Value>,
) -> Map<String, Value> {
    for (key, value) in additional {
        fixed.insert(key, value);
    }
    fixed
}

pub fn search_event_body(
    response: &SearchResponse,
    additional: Map<String, Value>,
) -> Map<String, Value> {
    let mut fixed = Map::new();
    fixed.insert(
        "numberOfResults".into(),
        json!(response.total_count().unwrap_or(0)),
    );
    fixed.insert("responseTime".into(), json!(response.duration().unwrap_or(0)));
    insert_opt(&mut fixed, "searchQueryUid", response.search_uid());
    insert_opt(&mut fixed, "queryPipeline", response.pipeline());
    merge_fields(fixed, additional)
}

pub fn click_event_body(
    result: &SearchResult,
    additional: Map<String, Value>,
) -> Map<String, Value> {
    let mut fixed = Map::new();
    insert_opt(&mut fixed, "documentUri", result.uri());
    insert_opt(&mut fixed, "documentUriHash", result.raw("urihash"));
    insert_opt(&mut fixed, "sourceName", result.raw("source"));
    insert_opt(&mut fixed, "documentTitle", result.title());
    insert_opt(&mut fixed, "documentUrl", result.uri());
    fixed.insert("contentIDKey".into(), json!(CONTENT_ID_KEY));
    insert_opt(&mut fixed, "contentIDValue", result.raw("permanentid"));
    merge_fields(fixed, additional)
}

/// Canonical `eventType` / `eventValue` pair for a custom event.
pub fn custom_event_fields(event_type: &str, event_value: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("eventType".into(), json!(event_type));
    fields.insert("eventValue".into(), json!(event_value));
    fields
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        map.insert(key.to_string(), json!(v));
    }
}
