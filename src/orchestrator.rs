//! Query orchestration: session bootstrap, search with one retry, result
//! display, and analytics.
//!
//! # Lifecycle
//!
//! ```text
//! NoSession ──bootstrap──▶ SessionReady ──▶ QueryInFlight ─┬─▶ ResultsReady
//!                                                           ├─▶ Failed
//!                                                           └─▶ RetryPending (HTTP 419, first attempt only)
//!                                                                   │ clear cached endpoint, bootstrap again
//!                                                                   ▼
//!                                                               QueryInFlight ─▶ ResultsReady | Failed
//! ```
//!
//! A user query is retried at most once. Every failure path ends in
//! [`QueryState::Failed`] with the result list cleared; nothing is returned
//! as an error to the caller.
//!
//! # Analytics
//!
//! Search and click events are spawned on the tokio runtime and not awaited,
//! so a slow or failing analytics endpoint never delays result display.
//! [`QueryOrchestrator::flush_events`] waits for whatever is still in flight
//! (the CLI calls it before exiting). Handles of finished events are pruned
//! each time a new event is spawned.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analytics::{AnalyticsClient, AnalyticsResponse};
use crate::config::Config;
use crate::endpoint::{self, EndpointIssuer, SessionEndpoint};
use crate::models::{RankedResult, SearchResponse, SearchResult};
use crate::search::{self, SearchOutcome};
use crate::store::SharedStore;
use crate::visitor::VisitorIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    NoSession,
    SessionReady,
    QueryInFlight,
    RetryPending,
    ResultsReady,
    Failed,
}

/// Result of a single search attempt.
enum Attempt {
    Done,
    Retry,
}

pub struct QueryOrchestrator {
    config: Config,
    http: reqwest::Client,
    session_store: SharedStore,
    issuer: Arc<dyn EndpointIssuer>,
    analytics: AnalyticsClient,
    endpoint: Option<SessionEndpoint>,
    guest_user: bool,
    state: QueryState,
    query: String,
    results: Vec<SearchResult>,
    last_query_uid: Option<String>,
    pending_events: Vec<JoinHandle<()>>,
}

impl QueryOrchestrator {
    /// `session_store` holds the cached endpoint descriptor; `local_store`
    /// holds the visitor id.
    pub fn new(
        config: &Config,
        session_store: SharedStore,
        local_store: SharedStore,
        issuer: Arc<dyn EndpointIssuer>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.platform.timeout_secs))
            .build()?;
        let analytics = AnalyticsClient::new(http.clone(), VisitorIdentity::new(local_store));

        Ok(Self {
            config: config.clone(),
            http,
            session_store,
            issuer,
            analytics,
            endpoint: None,
            guest_user: false,
            state: QueryState::NoSession,
            query: String::new(),
            results: Vec::new(),
            last_query_uid: None,
            pending_events: Vec::new(),
        })
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&SessionEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn last_query_uid(&self) -> Option<&str> {
        self.last_query_uid.as_deref()
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn visitor(&self) -> &VisitorIdentity {
        self.analytics.visitor()
    }

    /// Number of spawned analytics events not yet pruned or flushed.
    pub fn pending_events(&self) -> usize {
        self.pending_events.len()
    }

    // ============ Session ============

    /// Load or request the session endpoint. Failures are logged and leave
    /// the orchestrator without a session.
    pub async fn setup_endpoint(&mut self) {
        let result = endpoint::bootstrap(
            self.session_store.as_ref(),
            self.issuer.as_ref(),
            &self.config.session.search_hub,
            &self.config.platform.default_uri,
        )
        .await;

        match result {
            Ok((endpoint, descriptor)) => {
                debug!(client_uri = endpoint.client_uri(), "session endpoint ready");
                self.endpoint = Some(endpoint);
                self.guest_user = descriptor.is_guest_user;
                self.state = QueryState::SessionReady;
            }
            Err(e) => {
                error!(error = %e, "failed to set up session endpoint");
                self.endpoint = None;
                self.state = QueryState::NoSession;
            }
        }
    }

    /// Forget the cached endpoint and bootstrap a fresh one.
    pub async fn refresh_token(&mut self) {
        if let Err(e) = self.clear_session() {
            warn!(error = %e, "failed to clear cached endpoint");
        }
        self.setup_endpoint().await;
    }

    /// Drop the in-memory and cached session.
    pub fn clear_session(&mut self) -> Result<()> {
        self.endpoint = None;
        self.state = QueryState::NoSession;
        endpoint::clear_cached(self.session_store.as_ref())
    }

    // ============ Query ============

    /// Run a user query, retrying once on an expired token.
    pub async fn query(&mut self, query: &str) -> QueryState {
        self.query = query.to_string();
        self.init_and_query(true).await;
        self.state
    }

    /// `retry` allows one refresh-and-retry on HTTP 419.
    pub async fn init_and_query(&mut self, retry: bool) {
        let mut retry = retry;
        loop {
            match self.attempt(retry).await {
                Ok(Attempt::Done) => return,
                Ok(Attempt::Retry) => retry = false,
                Err(e) => {
                    error!(error = %e, "query failed");
                    self.results.clear();
                    self.state = QueryState::Failed;
                    return;
                }
            }
        }
    }

    async fn attempt(&mut self, retry: bool) -> Result<Attempt> {
        if self.query.trim().is_empty() {
            bail!("query is empty");
        }

        self.setup_endpoint().await;
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("no session endpoint available"))?;

        self.state = QueryState::QueryInFlight;
        let body = self.query_body();
        let outcome = search::execute_query(&self.http, &endpoint, &body).await?;

        match outcome {
            SearchOutcome::Success(response) => {
                self.show_results(&endpoint, response);
                Ok(Attempt::Done)
            }
            failed if failed.is_token_expired() && retry => {
                info!("search token expired, refreshing and retrying once");
                self.state = QueryState::RetryPending;
                self.refresh_token().await;
                Ok(Attempt::Retry)
            }
            SearchOutcome::Failed { status, body } => {
                bail!("Search API error {}: {}", status, body)
            }
        }
    }

    fn query_body(&self) -> Value {
        let mut body = self.config.query.extra.clone();
        body.insert("q".into(), json!(self.query));
        Value::Object(body)
    }

    fn show_results(&mut self, endpoint: &SessionEndpoint, response: SearchResponse) {
        let results = response.results();
        info!(
            total = response.total_count().unwrap_or(0),
            returned = results.len(),
            "search completed"
        );
        self.last_query_uid = response.search_uid().map(str::to_string);
        self.spawn_search_event(endpoint, response);
        self.results = results;
        self.state = QueryState::ResultsReady;
    }

    /// Up to `display.max_results` results in input order, ranked from 0.
    pub fn results_to_display(&self) -> Vec<RankedResult> {
        self.results
            .iter()
            .take(self.config.display.max_results)
            .enumerate()
            .map(|(rank, result)| RankedResult {
                rank,
                result: result.clone(),
            })
            .collect()
    }

    // ============ Analytics ============

    fn origin_fields(&self) -> Map<String, Value> {
        let analytics = &self.config.analytics;
        let mut fields = Map::new();
        fields.insert("actionCause".into(), json!(analytics.action_cause));
        fields.insert("language".into(), json!(analytics.language));
        fields.insert("originContext".into(), json!(analytics.action_cause));
        fields.insert("originLevel1".into(), json!(self.config.session.search_hub));
        fields.insert("originLevel2".into(), json!(analytics.origin_level2));
        fields.insert("userAgent".into(), json!(analytics.user_agent));
        fields.insert(
            "anonymous".into(),
            json!(analytics.anonymous || self.guest_user),
        );
        fields
    }

    fn spawn_search_event(&mut self, endpoint: &SessionEndpoint, response: SearchResponse) {
        let mut fields = self.origin_fields();
        fields.insert("queryText".into(), json!(self.query));

        let analytics = self.analytics.clone();
        let endpoint = endpoint.clone();
        self.spawn_event(async move {
            analytics
                .log_search_event(&endpoint, &response, fields, None)
                .await;
        });
    }

    /// Spawn an analytics task on the current runtime and track its handle.
    /// Returns false, dropping the event, when no runtime is running.
    fn spawn_event<F>(&mut self, event: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("analytics event dropped: no tokio runtime");
            return false;
        };
        self.pending_events.retain(|handle| !handle.is_finished());
        self.pending_events.push(runtime.spawn(event));
        true
    }

    /// Report a click on a displayed result.
    ///
    /// A missing or out-of-range rank is ignored. The event is spawned on the
    /// current tokio runtime; outside one it is dropped with a warning.
    /// Returns whether an event was dispatched.
    pub fn handle_result_click(&mut self, rank: Option<usize>) -> bool {
        let Some(rank) = rank else {
            return false;
        };
        if rank >= self.results.len().min(self.config.display.max_results) {
            debug!(rank, "click on unknown result ignored");
            return false;
        }
        let Some(endpoint) = self.endpoint.clone() else {
            warn!(rank, "click ignored: no session endpoint");
            return false;
        };

        let mut fields = self.origin_fields();
        fields.insert("documentPosition".into(), json!(rank + 1));
        if let Some(uid) = &self.last_query_uid {
            fields.insert("searchQueryUid".into(), json!(uid));
        }

        let analytics = self.analytics.clone();
        let result = self.results[rank].clone();
        self.spawn_event(async move {
            analytics
                .log_click_event(&endpoint, &result, fields, None)
                .await;
        })
    }

    /// Send a custom event and wait for it. Bootstraps a session if needed.
    pub async fn log_custom_event(
        &mut self,
        fields: Map<String, Value>,
    ) -> Result<AnalyticsResponse> {
        if self.endpoint.is_none() {
            self.setup_endpoint().await;
        }
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("no session endpoint available"))?;
        Ok(self
            .analytics
            .log_custom_event(&endpoint, fields, None)
            .await)
    }

    /// Wait for every spawned analytics event to finish.
    pub async fn flush_events(&mut self) {
        for handle in self.pending_events.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "analytics task did not complete");
            }
        }
    }
}
