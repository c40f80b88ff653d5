// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use futures_util::future::join_all;

use crate::pair::CredentialPair;
use crate::store::SessionState;
use crate::test_support::{Behavior, MockExchanger, SessionParts};

use super::*;

#[tokio::test]
async fn no_pair_fails_without_exchange() {
    let exchanger = Arc::new(MockExchanger::succeeding(60));
    let parts = SessionParts::new(exchanger.clone());

    let result = parts.coordinator.ensure_fresh().await;

    assert_eq!(result, Err(AuthError::SessionExpired));
    assert_eq!(exchanger.calls(), 0);
    assert_eq!(parts.sink.count(), 0);
}

#[tokio::test]
async fn success_updates_store_before_resolving() {
    let exchanger = Arc::new(MockExchanger::succeeding(3600));
    let parts = SessionParts::new(exchanger.clone());
    let old = CredentialPair::from_ttl("old-access", "old-refresh", 1);
    parts.store.set(old.clone());
    let mut events = parts.events.subscribe();

    parts.coordinator.ensure_fresh().await.expect("refresh ok");

    let current = parts.store.get().expect("pair present");
    assert_eq!(current.access, "access-1");
    assert!(current.access_expires_at > old.access_expires_at);
    assert_eq!(exchanger.seen_refresh(), vec!["old-refresh".to_owned()]);
    assert!(!parts.coordinator.is_refreshing());
    assert!(matches!(events.try_recv(), Ok(SessionEvent::Refreshed { .. })));
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
    let exchanger =
        Arc::new(MockExchanger::succeeding(3600).with_delay(Duration::from_millis(50)));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    let results = join_all((0..8).map(|_| parts.coordinator.ensure_fresh())).await;

    assert!(results.iter().all(|r| r.is_ok()), "results: {results:?}");
    assert_eq!(exchanger.calls(), 1);
    assert_eq!(parts.coordinator.exchange_count(), 1);
    assert_eq!(parts.store.get().map(|p| p.access), Some("access-1".to_owned()));
}

#[tokio::test]
async fn concurrent_callers_share_one_failure() {
    let exchanger = Arc::new(
        MockExchanger::rejecting("revoked").with_delay(Duration::from_millis(50)),
    );
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    let results = join_all((0..5).map(|_| parts.coordinator.ensure_fresh())).await;

    assert!(results.iter().all(|r| *r == Err(AuthError::SessionExpired)), "{results:?}");
    assert_eq!(exchanger.calls(), 1);
    assert_eq!(parts.sink.count(), 1);
}

#[tokio::test]
async fn spawned_callers_share_one_exchange() {
    let exchanger =
        Arc::new(MockExchanger::succeeding(3600).with_delay(Duration::from_millis(50)));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = Arc::clone(&parts.coordinator);
            tokio::spawn(async move { coordinator.ensure_fresh().await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.expect("join"), Ok(()));
    }

    assert_eq!(exchanger.calls(), 1);
}

#[tokio::test]
async fn rejection_clears_store_and_signals_once() {
    let exchanger = Arc::new(MockExchanger::rejecting("refresh token revoked"));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    let result = parts.coordinator.ensure_fresh().await;

    assert_eq!(result, Err(AuthError::SessionExpired));
    assert_eq!(parts.store.get(), None);
    assert_eq!(parts.store.state(), SessionState::Expired);
    assert_eq!(parts.sink.count(), 1);

    // No pair left: a second call fails fast, no new exchange, no new signal.
    assert_eq!(parts.coordinator.ensure_fresh().await, Err(AuthError::SessionExpired));
    assert_eq!(exchanger.calls(), 1);
    assert_eq!(parts.sink.count(), 1);
}

#[tokio::test]
async fn unavailable_keeps_session_for_later_callers() {
    let exchanger = Arc::new(MockExchanger::scripted(vec![
        Behavior::Unavailable("connection reset".into()),
        Behavior::Succeed { ttl_secs: 3600 },
    ]));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    let first = parts.coordinator.ensure_fresh().await;
    assert!(matches!(first, Err(AuthError::ExchangeUnavailable(_))), "{first:?}");
    assert_eq!(parts.store.state(), SessionState::Authenticated);
    assert_eq!(parts.sink.count(), 0);

    parts.coordinator.ensure_fresh().await.expect("second attempt succeeds");
    assert_eq!(exchanger.calls(), 2);
}

#[tokio::test]
async fn dropped_caller_does_not_strand_waiters() {
    let exchanger =
        Arc::new(MockExchanger::succeeding(3600).with_delay(Duration::from_millis(50)));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    // Start the exchange from a caller that gives up almost immediately.
    let leader = Arc::clone(&parts.coordinator);
    let abandoned =
        tokio::time::timeout(Duration::from_millis(5), async move { leader.ensure_fresh().await })
            .await;
    assert!(abandoned.is_err());

    // A later caller joins the still-running exchange.
    parts.coordinator.ensure_fresh().await.expect("joined exchange");
    assert_eq!(exchanger.calls(), 1);
    assert!(!parts.coordinator.is_refreshing());
}

#[tokio::test]
async fn sequential_refreshes_each_exchange() {
    let exchanger = Arc::new(MockExchanger::succeeding(3600));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r0", 1));

    parts.coordinator.ensure_fresh().await.expect("first");
    parts.coordinator.ensure_fresh().await.expect("second");

    assert_eq!(exchanger.calls(), 2);
    assert_eq!(exchanger.seen_refresh(), vec!["r0".to_owned(), "refresh-1".to_owned()]);
}

#[tokio::test]
async fn logout_during_exchange_is_not_undone() {
    let exchanger =
        Arc::new(MockExchanger::succeeding(3600).with_delay(Duration::from_millis(100)));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    let coordinator = Arc::clone(&parts.coordinator);
    let refresh = tokio::spawn(async move { coordinator.ensure_fresh().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    parts.store.clear();

    assert_eq!(refresh.await.expect("join"), Err(AuthError::NoSession));
    assert_eq!(parts.store.get(), None);
    assert_eq!(parts.store.state(), SessionState::Anonymous);
    assert_eq!(exchanger.calls(), 1);
    assert_eq!(parts.sink.count(), 0);
}

#[tokio::test]
async fn rejection_for_a_replaced_pair_keeps_the_new_login() {
    let exchanger =
        Arc::new(MockExchanger::rejecting("revoked").with_delay(Duration::from_millis(100)));
    let parts = SessionParts::new(exchanger.clone());
    parts.store.set(CredentialPair::from_ttl("a", "r", 1));

    let coordinator = Arc::clone(&parts.coordinator);
    let refresh = tokio::spawn(async move { coordinator.ensure_fresh().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    parts.store.set(CredentialPair::from_ttl("b", "r2", 600));

    assert_eq!(refresh.await.expect("join"), Ok(()));
    assert_eq!(parts.store.get().map(|p| p.access), Some("b".to_owned()));
    assert_eq!(parts.store.state(), SessionState::Authenticated);
    assert_eq!(parts.sink.count(), 0);
}
