// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: mocks, wiring helpers, and assertion macros.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::broadcast;

use crate::client::{ApiRequest, ApiResponse, AuthClient, Transport};
use crate::coordinator::RefreshCoordinator;
use crate::error::AuthError;
use crate::exchange::Exchanger;
use crate::pair::CredentialPair;
use crate::signal::{SessionEvent, UnauthorizedSignal, UnauthorizedSink};
use crate::storage::MemoryStorage;
use crate::store::CredentialStore;

pub use crate::ensure_crypto_provider;

/// Scripted outcome of one mock exchange.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return a new pair `access-N`/`refresh-N` (N = call number) with this ttl.
    Succeed { ttl_secs: u64 },
    Reject(String),
    Unavailable(String),
}

/// Exchanger that plays a script. The last behavior repeats once the
/// script is exhausted.
pub struct MockExchanger {
    script: Mutex<VecDeque<Behavior>>,
    last: Mutex<Behavior>,
    delay: Duration,
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl MockExchanger {
    pub fn scripted(script: Vec<Behavior>) -> Self {
        let last = script.last().cloned().unwrap_or(Behavior::Unavailable("empty script".into()));
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(ttl_secs: u64) -> Self {
        Self::scripted(vec![Behavior::Succeed { ttl_secs }])
    }

    pub fn rejecting(reason: &str) -> Self {
        Self::scripted(vec![Behavior::Reject(reason.to_owned())])
    }

    pub fn unavailable(reason: &str) -> Self {
        Self::scripted(vec![Behavior::Unavailable(reason.to_owned())])
    }

    /// Hold every exchange open for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Refresh credentials presented, in call order.
    pub fn seen_refresh(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    fn next_behavior(&self) -> Behavior {
        match self.script.lock().pop_front() {
            Some(b) => b,
            None => self.last.lock().clone(),
        }
    }
}

impl Exchanger for MockExchanger {
    fn exchange(
        &self,
        refresh: String,
    ) -> Pin<Box<dyn Future<Output = Result<CredentialPair, AuthError>> + Send + '_>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            self.seen.lock().push(refresh);
            let behavior = self.next_behavior();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match behavior {
                Behavior::Succeed { ttl_secs } => Ok(CredentialPair::from_ttl(
                    format!("access-{n}"),
                    format!("refresh-{n}"),
                    ttl_secs,
                )),
                Behavior::Reject(reason) => Err(AuthError::ExchangeRejected(reason)),
                Behavior::Unavailable(reason) => Err(AuthError::ExchangeUnavailable(reason)),
            }
        })
    }
}

/// Unauthorized sink that counts invocations.
#[derive(Default, Clone)]
pub struct CountingSink {
    count: Arc<AtomicU32>,
}

impl CountingSink {
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl UnauthorizedSink for CountingSink {
    fn unauthorized(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

type Responder = Box<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

/// Transport that answers from a closure and records what it was sent.
pub struct MockTransport {
    responder: Responder,
    calls: AtomicU32,
    seen: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static) -> Self {
        Self { responder: Box::new(responder), calls: AtomicU32::new(0), seen: Mutex::new(Vec::new()) }
    }

    /// Always answer with `status`.
    pub fn always(status: StatusCode) -> Self {
        Self::new(move |_| ApiResponse::new(status, ""))
    }

    /// 200 when the bearer matches `access`, 401 otherwise.
    pub fn accepting(access: &str) -> Self {
        let access = access.to_owned();
        Self::new(move |req| {
            if req.bearer() == Some(access.as_str()) {
                ApiResponse::new(StatusCode::OK, "{\"ok\":true}")
            } else {
                ApiResponse::new(StatusCode::UNAUTHORIZED, "{\"detail\":\"bad token\"}")
            }
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Bearer credential of each call, in order.
    pub fn seen_bearers(&self) -> Vec<Option<String>> {
        self.seen.lock().iter().map(|r| r.bearer().map(str::to_owned)).collect()
    }

    pub fn seen(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }
}

impl Transport for MockTransport {
    fn call(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApiResponse>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let response = (self.responder)(&request);
        self.seen.lock().push(request);
        Box::pin(async move { Ok(response) })
    }
}

/// The core components wired over in-memory storage, without background tasks.
pub struct SessionParts {
    pub storage: Arc<MemoryStorage>,
    pub events: broadcast::Sender<SessionEvent>,
    pub store: Arc<CredentialStore>,
    pub sink: CountingSink,
    pub signal: Arc<UnauthorizedSignal>,
    pub coordinator: Arc<RefreshCoordinator>,
}

impl SessionParts {
    pub fn new(exchanger: Arc<dyn Exchanger>) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let (events, _) = broadcast::channel(64);
        let store = Arc::new(CredentialStore::open(storage.clone(), events.clone()));
        let sink = CountingSink::default();
        let signal = Arc::new(UnauthorizedSignal::new(Arc::new(sink.clone()), events.clone()));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            exchanger,
            Arc::clone(&signal),
            events.clone(),
        );
        Self { storage, events, store, sink, signal, coordinator }
    }

    pub fn client(&self, transport: Arc<dyn Transport>) -> AuthClient {
        AuthClient::new(
            transport,
            Arc::clone(&self.store),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.signal),
        )
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
