// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight refresh coordination.
//!
//! However many callers ask for a refresh while one is outstanding, exactly
//! one exchange runs. Every caller parks a oneshot slot in the waiter queue;
//! the exchange task updates the store first, then drains the queue and
//! resolves every slot with the same outcome.
//!
//! The exchange runs on its own task so that a caller dropping its future
//! never strands the other waiters. Its outcome only touches the store if
//! the pair it started from is still installed; a logout or a new login
//! during the exchange wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::exchange::Exchanger;
use crate::signal::{SessionEvent, UnauthorizedSignal};
use crate::store::CredentialStore;

type Waiter = oneshot::Sender<Result<(), AuthError>>;

#[derive(Default)]
struct Flight {
    in_flight: bool,
    waiters: Vec<Waiter>,
}

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    exchanger: Arc<dyn Exchanger>,
    signal: Arc<UnauthorizedSignal>,
    events: broadcast::Sender<SessionEvent>,
    flight: Mutex<Flight>,
    exchanges: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        exchanger: Arc<dyn Exchanger>,
        signal: Arc<UnauthorizedSignal>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            exchanger,
            signal,
            events,
            flight: Mutex::new(Flight::default()),
            exchanges: AtomicU64::new(0),
        })
    }

    /// Make sure the store holds a freshly exchanged pair.
    ///
    /// Joins the in-flight exchange if there is one, otherwise starts it.
    /// Fails with `SessionExpired` when there is no pair or the refresh
    /// credential was rejected, and with `ExchangeUnavailable` when the
    /// exchange could not reach the server.
    pub async fn ensure_fresh(self: &Arc<Self>) -> Result<(), AuthError> {
        let rx = {
            let mut flight = self.flight.lock();
            let (tx, rx) = oneshot::channel();
            if flight.in_flight {
                flight.waiters.push(tx);
                debug!(waiters = flight.waiters.len(), "joined in-flight refresh");
            } else {
                let Some(pair) = self.store.get() else {
                    debug!("refresh requested without a session");
                    return Err(AuthError::SessionExpired);
                };
                flight.in_flight = true;
                flight.waiters.push(tx);

                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.run_exchange(pair.refresh).await;
                });
            }
            rx
        };

        rx.await.unwrap_or(Err(AuthError::SessionExpired))
    }

    /// Whether an exchange is outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.flight.lock().in_flight
    }

    /// Number of exchanges started since construction.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    async fn run_exchange(&self, refresh: String) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        debug!("starting refresh exchange");

        let exchanger = Arc::clone(&self.exchanger);
        let presented = refresh.clone();
        let outcome = match tokio::spawn(async move { exchanger.exchange(presented).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(AuthError::ExchangeUnavailable(format!("exchange task failed: {e}"))),
        };

        let result = match outcome {
            Ok(pair) => {
                let access_expires_at = pair.access_expires_at;
                if self.store.set_if_current(&refresh, pair) {
                    self.signal.rearm();
                    let _ = self.events.send(SessionEvent::Refreshed { access_expires_at });
                    info!(access_expires_at, "credentials refreshed");
                    Ok(())
                } else {
                    info!("session changed during refresh, discarding exchanged pair");
                    self.superseded()
                }
            }
            Err(AuthError::ExchangeUnavailable(reason)) => {
                warn!(err = %reason, "refresh exchange unavailable, session kept");
                Err(AuthError::ExchangeUnavailable(reason))
            }
            Err(e) => {
                if self.store.expire_if_current(&refresh) {
                    warn!(err = %e, "refresh exchange rejected, ending session");
                    self.signal.raise();
                    Err(AuthError::SessionExpired)
                } else {
                    info!(err = %e, "refresh rejected for a pair no longer installed");
                    self.superseded()
                }
            }
        };

        // Snapshot then clear, so resolution never touches the live queue.
        let waiters = {
            let mut flight = self.flight.lock();
            flight.in_flight = false;
            std::mem::take(&mut flight.waiters)
        };
        debug!(waiters = waiters.len(), ok = result.is_ok(), "resolving refresh waiters");
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Outcome for waiters when the session changed under the exchange:
    /// a newer pair is usable as-is, a logout is not a failure episode.
    fn superseded(&self) -> Result<(), AuthError> {
        match self.store.get() {
            Some(_) => Ok(()),
            None => Err(AuthError::NoSession),
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
