//! End-to-end orchestrator scenarios against a mock Coveo platform.
//!
//! One mockito server plays both the Search API and Usage Analytics; the
//! endpoint issuer is an in-process fake that hands out tokens in order so
//! the expired-token retry path can be driven deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use coveo_chatbot::config::Config;
use coveo_chatbot::endpoint::{EndpointIssuer, SESSION_ENDPOINT_KEY};
use coveo_chatbot::orchestrator::{QueryOrchestrator, QueryState};
use coveo_chatbot::store::{InMemoryStore, KeyValueStore, SharedStore};
use coveo_chatbot::visitor::VISITOR_ID_KEY;
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{json, Value};

// ─── Fake issuer ────────────────────────────────────────────────────

/// Issues descriptors pointing at the mock server, one token per call; the
/// last token repeats once the list is exhausted.
struct SequenceIssuer {
    base: String,
    tokens: Vec<&'static str>,
    calls: AtomicUsize,
}

impl SequenceIssuer {
    fn new(base: String, tokens: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            base,
            tokens,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointIssuer for SequenceIssuer {
    async fn issue(&self, search_hub: &str) -> Result<String> {
        assert_eq!(search_hub, "Chatbot");
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let token = self.tokens[n.min(self.tokens.len() - 1)];
        Ok(json!({
            "token": token,
            "clientUri": self.base,
            "analyticsUri": self.base,
        })
        .to_string())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

struct Harness {
    orch: QueryOrchestrator,
    issuer: Arc<SequenceIssuer>,
    session_store: SharedStore,
    local_store: SharedStore,
}

fn harness(server: &ServerGuard, tokens: Vec<&'static str>) -> Harness {
    let issuer = SequenceIssuer::new(server.url(), tokens);
    let session_store = InMemoryStore::shared();
    let local_store = InMemoryStore::shared();
    let orch = QueryOrchestrator::new(
        &Config::minimal(),
        session_store.clone(),
        local_store.clone(),
        issuer.clone(),
    )
    .unwrap();
    Harness {
        orch,
        issuer,
        session_store,
        local_store,
    }
}

fn search_body() -> Value {
    json!({
        "totalCount": 5,
        "duration": 87,
        "searchUid": "abc",
        "pipeline": "chatbot",
        "results": (0..5).map(|i| json!({
            "title": format!("Result {}", i),
            "uri": format!("https://docs.example.com/{}", i),
            "raw": {
                "urihash": format!("hash{}", i),
                "source": "Docs",
                "permanentid": format!("perm{}", i),
            }
        })).collect::<Vec<_>>(),
    })
}

async fn search_mock(
    server: &mut ServerGuard,
    query: &str,
    token: &str,
    status: usize,
    hits: usize,
) -> Mock {
    let body = if status == 200 {
        search_body().to_string()
    } else {
        json!({ "statusCode": status, "message": "error" }).to_string()
    };
    server
        .mock("POST", "/rest/search/v2")
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .match_body(Matcher::PartialJson(json!({ "q": query })))
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_query_displays_top_three_and_logs_search() {
    let mut server = mockito::Server::new_async().await;
    let search = search_mock(&mut server, "test", "good", 200, 1).await;
    let analytics = server
        .mock("POST", "/rest/ua/v15/analytics/search")
        .match_header("authorization", "Bearer good")
        .match_body(Matcher::PartialJson(json!({
            "searchQueryUid": "abc",
            "numberOfResults": 5,
            "responseTime": 87,
            "queryPipeline": "chatbot",
            "queryText": "test",
            "actionCause": "Chatbot",
            "originLevel1": "Chatbot",
            "originLevel2": "Chatbot question",
            "language": "en",
        })))
        .with_status(200)
        .with_body(r#"{"visitorId":"visitor-1"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    let state = h.orch.query("test").await;
    h.orch.flush_events().await;

    assert_eq!(state, QueryState::ResultsReady);
    assert_eq!(h.orch.last_query_uid(), Some("abc"));

    let shown = h.orch.results_to_display();
    assert_eq!(shown.len(), 3);
    let ranks: Vec<usize> = shown.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![0, 1, 2]);
    assert_eq!(shown[1].result.title(), Some("Result 1"));

    search.assert_async().await;
    analytics.assert_async().await;
    assert_eq!(
        h.local_store.get(VISITOR_ID_KEY).unwrap().as_deref(),
        Some("visitor-1")
    );
    assert!(h.session_store.get(SESSION_ENDPOINT_KEY).unwrap().is_some());
    assert_eq!(h.issuer.calls(), 1);
}

#[tokio::test]
async fn test_expired_token_retries_once_and_succeeds() {
    let mut server = mockito::Server::new_async().await;
    let expired = search_mock(&mut server, "test", "expired", 419, 1).await;
    let fresh = search_mock(&mut server, "test", "fresh", 200, 1).await;
    let analytics = server
        .mock("POST", "/rest/ua/v15/analytics/search")
        .match_header("authorization", "Bearer fresh")
        .with_status(200)
        .with_body(r#"{"visitorId":"v"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut h = harness(&server, vec!["expired", "fresh"]);
    let state = h.orch.query("test").await;
    h.orch.flush_events().await;

    assert_eq!(state, QueryState::ResultsReady);
    expired.assert_async().await;
    fresh.assert_async().await;
    analytics.assert_async().await;
    assert_eq!(h.issuer.calls(), 2);
    assert_eq!(h.orch.endpoint().unwrap().token(), "fresh");
}

#[tokio::test]
async fn test_expired_token_is_not_retried_twice() {
    let mut server = mockito::Server::new_async().await;
    let expired = search_mock(&mut server, "test", "expired", 419, 2).await;
    let analytics = server
        .mock("POST", Matcher::Regex("^/rest/ua/".to_string()))
        .expect(0)
        .create_async()
        .await;

    let mut h = harness(&server, vec!["expired"]);
    let state = h.orch.query("test").await;
    h.orch.flush_events().await;

    assert_eq!(state, QueryState::Failed);
    assert!(h.orch.results_to_display().is_empty());
    expired.assert_async().await;
    analytics.assert_async().await;
    assert_eq!(h.issuer.calls(), 2);
}

#[tokio::test]
async fn test_other_error_status_fails_and_clears_results() {
    let mut server = mockito::Server::new_async().await;
    let ok = search_mock(&mut server, "test", "good", 200, 1).await;
    server
        .mock("POST", "/rest/ua/v15/analytics/search")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    assert_eq!(h.orch.query("test").await, QueryState::ResultsReady);
    assert_eq!(h.orch.results().len(), 5);
    ok.assert_async().await;

    let broken = search_mock(&mut server, "broken", "good", 500, 1).await;
    assert_eq!(h.orch.query("broken").await, QueryState::Failed);
    assert!(h.orch.results().is_empty());
    broken.assert_async().await;
    // No retry and no new token for a non-419 failure.
    assert_eq!(h.issuer.calls(), 1);
    h.orch.flush_events().await;
}

#[tokio::test]
async fn test_analytics_outage_does_not_affect_results() {
    let mut server = mockito::Server::new_async().await;
    search_mock(&mut server, "test", "good", 200, 1).await;
    server
        .mock("POST", "/rest/ua/v15/analytics/search")
        .with_status(503)
        .with_body("unavailable")
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    assert_eq!(h.orch.query("test").await, QueryState::ResultsReady);
    h.orch.flush_events().await;
    assert_eq!(h.orch.results_to_display().len(), 3);
    assert_eq!(h.local_store.get(VISITOR_ID_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_click_reports_result_with_query_uid_and_visitor() {
    let mut server = mockito::Server::new_async().await;
    search_mock(&mut server, "test", "good", 200, 1).await;
    server
        .mock("POST", "/rest/ua/v15/analytics/search")
        .with_status(200)
        .with_body(r#"{"visitorId":"visitor-9"}"#)
        .create_async()
        .await;
    let click = server
        .mock("POST", "/rest/ua/v15/analytics/click")
        .match_query(Matcher::UrlEncoded("visitor".into(), "visitor-9".into()))
        .match_header("authorization", "Bearer good")
        .match_body(Matcher::PartialJson(json!({
            "documentUri": "https://docs.example.com/1",
            "documentUrl": "https://docs.example.com/1",
            "documentUriHash": "hash1",
            "sourceName": "Docs",
            "documentTitle": "Result 1",
            "contentIDKey": "@permanentid",
            "contentIDValue": "perm1",
            "documentPosition": 2,
            "searchQueryUid": "abc",
        })))
        .with_status(200)
        .with_body(r#"{"visitorId":"visitor-9"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    h.orch.query("test").await;
    // Let the search event land first so the click carries its visitor id.
    h.orch.flush_events().await;

    assert!(h.orch.handle_result_click(Some(1)));
    h.orch.flush_events().await;
    click.assert_async().await;
}

#[tokio::test]
async fn test_click_outside_displayed_results_sends_nothing() {
    let mut server = mockito::Server::new_async().await;
    search_mock(&mut server, "test", "good", 200, 1).await;
    server
        .mock("POST", "/rest/ua/v15/analytics/search")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let click = server
        .mock("POST", "/rest/ua/v15/analytics/click")
        .expect(0)
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    h.orch.query("test").await;

    assert!(!h.orch.handle_result_click(None));
    assert!(!h.orch.handle_result_click(Some(3)));
    assert!(!h.orch.handle_result_click(Some(42)));
    h.orch.flush_events().await;
    click.assert_async().await;
}

#[tokio::test]
async fn test_custom_event_uses_session_and_caller_fields() {
    let mut server = mockito::Server::new_async().await;
    let custom = server
        .mock("POST", "/rest/ua/v15/analytics/custom")
        .match_header("authorization", "Bearer good")
        .match_body(Matcher::Json(json!({
            "eventType": "chatbot",
            "eventValue": "escalated",
            "caseId": "500xx"
        })))
        .with_status(200)
        .with_body(r#"{"visitorId":"visitor-c"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    let mut fields = coveo_chatbot::analytics::custom_event_fields("chatbot", "escalated");
    fields.insert("caseId".into(), json!("500xx"));

    let response = h.orch.log_custom_event(fields).await.unwrap();
    custom.assert_async().await;
    assert_eq!(response.visitor_id.as_deref(), Some("visitor-c"));
    assert_eq!(
        h.orch.visitor().get().as_deref(),
        Some("visitor-c")
    );
}

#[tokio::test]
async fn test_results_with_null_title_are_still_shown() {
    let mut server = mockito::Server::new_async().await;
    let body = json!({
        "totalCount": 2,
        "searchUid": "odd",
        "results": [
            { "title": null, "uri": "https://a", "raw": { "source": 12 } },
            { "title": "Fine", "uri": "https://b", "raw": {} }
        ]
    });
    server
        .mock("POST", "/rest/search/v2")
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/rest/ua/v15/analytics/search")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let click = server
        .mock("POST", "/rest/ua/v15/analytics/click")
        .match_body(Matcher::PartialJson(json!({
            "documentUri": "https://a",
            "documentPosition": 1,
            "searchQueryUid": "odd",
        })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    assert_eq!(h.orch.query("test").await, QueryState::ResultsReady);

    let shown = h.orch.results_to_display();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].result.title(), None);
    assert_eq!(shown[0].result.as_value(), &body["results"][0]);

    assert!(h.orch.handle_result_click(Some(0)));
    h.orch.flush_events().await;
    click.assert_async().await;
}

#[tokio::test]
async fn test_repeated_queries_do_not_accumulate_event_handles() {
    let mut server = mockito::Server::new_async().await;
    search_mock(&mut server, "test", "good", 200, 20).await;
    server
        .mock("POST", Matcher::Regex("^/rest/ua/v15/analytics/".to_string()))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut h = harness(&server, vec!["good"]);
    for _ in 0..20 {
        assert_eq!(h.orch.query("test").await, QueryState::ResultsReady);
        assert!(h.orch.handle_result_click(Some(0)));
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // Only events from the last round or two can still be tracked.
    assert!(
        h.orch.pending_events() <= 4,
        "pending events: {}",
        h.orch.pending_events()
    );
    h.orch.flush_events().await;
    assert_eq!(h.orch.pending_events(), 0);
}
