// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use futures_util::future::join_all;

use crate::pair::CredentialPair;
use crate::store::SessionState;
use crate::test_support::{MockExchanger, MockTransport, SessionParts};

use super::*;

#[yare::parameterized(
    relative_with_slash    = { "http://localhost/api", "/items", "http://localhost/api/items" },
    relative_without_slash = { "http://localhost/api/", "items", "http://localhost/api/items" },
    trailing_base_slash    = { "http://localhost/api/", "/items?q=1", "http://localhost/api/items?q=1" },
    absolute_http          = { "http://localhost/api", "http://other/x", "http://other/x" },
    absolute_https         = { "http://localhost/api", "https://other/x", "https://other/x" },
)]
fn url_resolution(base: &str, path: &str, expected: &str) {
    assert_eq!(resolve_url(base, path), expected);
}

#[test]
fn json_body_sets_content_type() -> anyhow::Result<()> {
    let req = ApiRequest::new(Method::POST, "/x").json(&serde_json::json!({ "a": 1 }))?;
    assert_eq!(req.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()), Some("application/json"));
    assert_eq!(req.body.as_deref(), Some(&b"{\"a\":1}"[..]));
    Ok(())
}

#[test]
fn error_for_status_surfaces_detail() {
    let resp = ApiResponse::new(StatusCode::BAD_REQUEST, "{\"detail\":\"name taken\"}");
    crate::assert_err_contains!(resp.error_for_status(), "name taken");

    let ok = ApiResponse::new(StatusCode::OK, "[]");
    assert!(ok.error_for_status().is_ok());
}

#[test]
fn empty_body_reads_as_null() -> anyhow::Result<()> {
    let resp = ApiResponse::new(StatusCode::NO_CONTENT, "");
    assert_eq!(resp.json::<serde_json::Value>()?, serde_json::Value::Null);
    Ok(())
}

#[tokio::test]
async fn attaches_current_access_credential() -> anyhow::Result<()> {
    let parts = SessionParts::new(Arc::new(MockExchanger::succeeding(60)));
    parts.store.set(CredentialPair::from_ttl("good", "r", 60));
    let transport = Arc::new(MockTransport::accepting("good"));
    let client = parts.client(transport.clone());

    let resp = client.get("/items").await?;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(transport.seen_bearers(), vec![Some("good".to_owned())]);
    Ok(())
}

#[tokio::test]
async fn anonymous_requests_carry_no_credential() -> anyhow::Result<()> {
    let parts = SessionParts::new(Arc::new(MockExchanger::succeeding(60)));
    let transport = Arc::new(MockTransport::always(StatusCode::OK));
    let client = parts.client(transport.clone());

    client.get("/public").await?;

    assert_eq!(transport.seen_bearers(), vec![None]);
    Ok(())
}

#[tokio::test]
async fn non_auth_failures_are_returned_as_is() -> anyhow::Result<()> {
    let exchanger = Arc::new(MockExchanger::succeeding(60));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 60));
    let transport = Arc::new(MockTransport::always(StatusCode::INTERNAL_SERVER_ERROR));
    let client = parts.client(transport.clone());

    let resp = client.get("/boom").await?;

    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(transport.calls(), 1);
    assert_eq!(exchanger.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn unauthorized_refreshes_and_retries_once() -> anyhow::Result<()> {
    let exchanger = Arc::new(MockExchanger::succeeding(3600));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("stale", "r", 60));
    // The mock exchanger's first pair is `access-1`.
    let transport = Arc::new(MockTransport::accepting("access-1"));
    let client = parts.client(transport.clone());

    let resp = client.post("/items", &serde_json::json!({ "name": "x" })).await?;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        transport.seen_bearers(),
        vec![Some("stale".to_owned()), Some("access-1".to_owned())]
    );
    // The retry replays the same body and is marked as the retry.
    let seen = transport.seen();
    assert_eq!(seen[0].body, seen[1].body);
    assert!(!seen[0].is_retried());
    assert!(seen[1].is_retried());
    assert_eq!(exchanger.calls(), 1);
    assert_eq!(parts.sink.count(), 0);
    Ok(())
}

#[tokio::test]
async fn retry_still_unauthorized_stops_after_two_attempts() -> anyhow::Result<()> {
    let exchanger = Arc::new(MockExchanger::succeeding(3600));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("stale", "r", 60));
    let transport = Arc::new(MockTransport::always(StatusCode::UNAUTHORIZED));
    let client = parts.client(transport.clone());

    let resp = client.delete("/items/1").await?;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(transport.calls(), 2);
    assert_eq!(exchanger.calls(), 1);
    assert_eq!(parts.sink.count(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_returns_original_response() -> anyhow::Result<()> {
    let parts = SessionParts::new(Arc::new(MockExchanger::rejecting("revoked")));
    parts.store.set(CredentialPair::from_ttl("stale", "r", 60));
    let transport = Arc::new(MockTransport::new(|_| {
        ApiResponse::new(StatusCode::UNAUTHORIZED, "{\"detail\":\"first\"}")
    }));
    let client = parts.client(transport.clone());

    let resp = client.get("/me").await?;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert!(resp.text().contains("first"));
    assert_eq!(transport.calls(), 1);
    assert_eq!(parts.sink.count(), 1);
    assert_eq!(parts.store.state(), SessionState::Expired);
    Ok(())
}

#[tokio::test]
async fn unauthorized_without_session_signals() -> anyhow::Result<()> {
    let exchanger = Arc::new(MockExchanger::succeeding(60));
    let parts = SessionParts::new(exchanger.clone());
    let transport = Arc::new(MockTransport::always(StatusCode::UNAUTHORIZED));
    let client = parts.client(transport.clone());

    let resp = client.get("/me").await?;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(transport.calls(), 1);
    assert_eq!(exchanger.calls(), 0);
    assert_eq!(parts.sink.count(), 1);
    Ok(())
}

#[tokio::test]
async fn unavailable_refresh_keeps_session_quiet() -> anyhow::Result<()> {
    let parts = SessionParts::new(Arc::new(MockExchanger::unavailable("connection refused")));
    parts.store.set(CredentialPair::from_ttl("stale", "r", 60));
    let transport = Arc::new(MockTransport::always(StatusCode::UNAUTHORIZED));
    let client = parts.client(transport.clone());

    let resp = client.get("/me").await?;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(transport.calls(), 1);
    assert_eq!(parts.sink.count(), 0);
    assert_eq!(parts.store.state(), SessionState::Authenticated);
    Ok(())
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() -> anyhow::Result<()> {
    let exchanger =
        Arc::new(MockExchanger::succeeding(3600).with_delay(Duration::from_millis(30)));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("stale", "r", 60));
    let transport = Arc::new(MockTransport::accepting("access-1"));
    let client = parts.client(transport.clone());

    let paths: Vec<String> = (0..6).map(|i| format!("/items/{i}")).collect();
    let results = join_all(paths.iter().map(|p| client.get(p))).await;

    for result in results {
        assert_eq!(result?.status, StatusCode::OK);
    }
    assert_eq!(exchanger.calls(), 1);
    assert_eq!(transport.calls(), 12);
    Ok(())
}

#[tokio::test]
async fn transport_errors_propagate_unchanged() {
    struct Failing;
    impl Transport for Failing {
        fn call(
            &self,
            _request: ApiRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApiResponse>> + Send + '_>> {
            Box::pin(async { Err::<ApiResponse, _>(anyhow::anyhow!("connection reset by peer")) })
        }
    }

    let parts = SessionParts::new(Arc::new(MockExchanger::succeeding(60)));
    let client = parts.client(Arc::new(Failing));

    crate::assert_err_contains!(client.get("/x").await, "connection reset");
}
