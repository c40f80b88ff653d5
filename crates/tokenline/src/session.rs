// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session facade: wires the store, coordinator, client, scheduler and
//! cross-context sync together and owns their background tasks.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{AuthClient, HttpTransport, Transport, DEFAULT_API_BASE};
use crate::coordinator::RefreshCoordinator;
use crate::error::AuthError;
use crate::exchange::{Exchanger, HttpExchanger};
use crate::pair::{CredentialPair, TokenResponse};
use crate::scheduler::RefreshScheduler;
use crate::signal::{SessionEvent, UnauthorizedSignal, UnauthorizedSink};
use crate::storage::PersistentStorage;
use crate::store::{CredentialStore, SessionState};
use crate::sync::StorageWatcher;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub api_base: String,
    /// How long before access expiry the scheduler refreshes.
    pub refresh_early: Duration,
    pub request_timeout: Duration,
    /// Run the proactive refresh scheduler.
    pub proactive_refresh: bool,
    /// Poll interval for cross-context sync; `None` disables it.
    pub sync_poll: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_owned(),
            refresh_early: Duration::from_millis(1_000),
            request_timeout: Duration::from_secs(30),
            proactive_refresh: true,
            sync_poll: Some(Duration::from_secs(2)),
        }
    }
}

/// Serializable snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    pub refreshing: bool,
}

pub struct Session {
    store: Arc<CredentialStore>,
    signal: Arc<UnauthorizedSignal>,
    coordinator: Arc<RefreshCoordinator>,
    client: AuthClient,
    scheduler: Option<RefreshScheduler>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl Session {
    /// Wire a session from its collaborators and start its background tasks.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        storage: Arc<dyn PersistentStorage>,
        exchanger: Arc<dyn Exchanger>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn UnauthorizedSink>,
        options: &SessionOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();
        let watch_path = storage.watch_path().map(Path::to_path_buf);

        let store = Arc::new(CredentialStore::open(storage, events.clone()));
        let signal = Arc::new(UnauthorizedSignal::new(sink, events.clone()));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            exchanger,
            Arc::clone(&signal),
            events.clone(),
        );
        let client = AuthClient::new(
            transport,
            Arc::clone(&store),
            Arc::clone(&coordinator),
            Arc::clone(&signal),
        );

        let scheduler = options.proactive_refresh.then(|| {
            RefreshScheduler::spawn(
                &store,
                Arc::clone(&coordinator),
                options.refresh_early,
                &shutdown,
            )
        });
        if let Some(poll) = options.sync_poll {
            StorageWatcher::new(watch_path)
                .with_poll_interval(poll)
                .with_signal(Arc::clone(&signal))
                .spawn(Arc::clone(&store), shutdown.child_token());
        }

        Self { store, signal, coordinator, client, scheduler, events, shutdown }
    }

    /// Start a session talking HTTP to `options.api_base`. The exchanger and
    /// the request client share one connection pool.
    pub fn open_http(
        storage: Arc<dyn PersistentStorage>,
        sink: Arc<dyn UnauthorizedSink>,
        options: &SessionOptions,
    ) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&options.api_base, options.request_timeout)?;
        let exchanger = HttpExchanger::with_client(transport.client().clone(), &options.api_base);
        Ok(Self::start(storage, Arc::new(exchanger), Arc::new(transport), sink, options))
    }

    /// Install a pair from an external login flow.
    pub fn login(&self, pair: CredentialPair) {
        let access_expires_at = pair.access_expires_at;
        self.store.set(pair);
        self.signal.rearm();
        let _ = self.events.send(SessionEvent::Installed { access_expires_at });
        info!(access_expires_at, "logged in");
    }

    /// Install a raw login response.
    pub fn login_with(&self, response: TokenResponse) {
        self.login(response.into_pair());
    }

    /// Drop the session. The scheduler disarms when it sees the empty store.
    pub fn logout(&self) {
        self.store.clear();
        self.signal.rearm();
        info!("logged out");
    }

    /// The installed pair, or `NoSession`.
    pub fn pair(&self) -> Result<CredentialPair, AuthError> {
        self.store.get().ok_or(AuthError::NoSession)
    }

    pub fn state(&self) -> SessionState {
        self.store.state()
    }

    pub fn status(&self) -> SessionStatus {
        let pair = self.store.get();
        SessionStatus {
            state: self.store.state(),
            access_expires_at: pair.as_ref().map(|p| p.access_expires_at),
            expires_in_secs: pair.as_ref().map(|p| p.time_until_expiry().as_secs()),
            refreshing: self.coordinator.is_refreshing(),
        }
    }

    /// Lifecycle events. Receivers only see events sent after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn scheduler(&self) -> Option<&RefreshScheduler> {
        self.scheduler.as_ref()
    }

    /// Stop background tasks. An exchange already in flight still completes.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
