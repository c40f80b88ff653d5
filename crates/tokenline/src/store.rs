// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store: the single shared holder of the current pair.
//!
//! Reads are lock-free snapshots of a `watch` channel. Writers and
//! cross-context adoption are serialized by one mutex held across the
//! storage write and the publish, so storage never lags the local view.
//! `set` and `clear` persist first and publish to every local observer
//! before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::pair::CredentialPair;
use crate::signal::SessionEvent;
use crate::storage::PersistentStorage;

/// Derived session state. Never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No pair installed.
    Anonymous,
    /// A pair is installed (it may be stale).
    Authenticated,
    /// The last refresh failed and the store was cleared.
    Expired,
}

/// Outcome of [`CredentialStore::adopt_external`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// Storage matched the local pair.
    Unchanged,
    /// Another context's pair replaced the local one.
    Installed,
    /// Another context logged out.
    Cleared,
}

impl Adoption {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

pub struct CredentialStore {
    storage: Arc<dyn PersistentStorage>,
    /// Held across persist-then-publish by every writer.
    write: Mutex<()>,
    pair_tx: watch::Sender<Option<CredentialPair>>,
    /// Set when a refresh failure emptied the store.
    expired: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl CredentialStore {
    /// Open the store, recovering any persisted pair. An unreadable record
    /// is treated as no pair.
    pub fn open(
        storage: Arc<dyn PersistentStorage>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let initial = load_or_none(storage.as_ref());
        if let Some(ref pair) = initial {
            let expires_in_ms = pair.time_until_expiry().as_millis() as u64;
            info!(expires_in_ms, "recovered persisted credentials");
        }
        let (pair_tx, _) = watch::channel(initial);
        Self { storage, write: Mutex::new(()), pair_tx, expired: AtomicBool::new(false), events }
    }

    /// Current pair, if any.
    pub fn get(&self) -> Option<CredentialPair> {
        self.pair_tx.borrow().clone()
    }

    /// Replace the pair. Observers see it before this returns.
    pub fn set(&self, pair: CredentialPair) {
        let _write = self.write.lock();
        self.install(pair);
    }

    /// Replace the pair only while `refresh` is still the installed refresh
    /// credential. Returns `false` if the session was cleared or replaced.
    pub(crate) fn set_if_current(&self, refresh: &str, pair: CredentialPair) -> bool {
        let _write = self.write.lock();
        if !self.holds_refresh(refresh) {
            return false;
        }
        self.install(pair);
        true
    }

    /// Remove the pair (explicit logout).
    pub fn clear(&self) {
        let _write = self.write.lock();
        self.expired.store(false, Ordering::Release);
        self.remove();
    }

    /// Remove the pair after a failed refresh of `refresh`; the state reads
    /// as `Expired`. Returns `false`, leaving the store alone, if that pair
    /// is no longer installed.
    pub(crate) fn expire_if_current(&self, refresh: &str) -> bool {
        let _write = self.write.lock();
        if !self.holds_refresh(refresh) {
            return false;
        }
        self.expired.store(true, Ordering::Release);
        self.remove();
        true
    }

    fn holds_refresh(&self, refresh: &str) -> bool {
        self.pair_tx.borrow().as_ref().is_some_and(|p| p.refresh == refresh)
    }

    // Callers hold `write`.
    fn install(&self, pair: CredentialPair) {
        if let Err(e) = self.storage.save(&pair) {
            warn!(err = %e, "failed to persist credentials");
        }
        self.expired.store(false, Ordering::Release);
        let access_expires_at = pair.access_expires_at;
        self.pair_tx.send_replace(Some(pair));
        debug!(access_expires_at, "credentials stored");
    }

    // Callers hold `write`.
    fn remove(&self) {
        if let Err(e) = self.storage.clear() {
            warn!(err = %e, "failed to clear persisted credentials");
        }
        let had_pair = self.pair_tx.send_replace(None).is_some();
        if had_pair {
            let _ = self.events.send(SessionEvent::Cleared);
        }
    }

    pub fn state(&self) -> SessionState {
        if self.pair_tx.borrow().is_some() {
            SessionState::Authenticated
        } else if self.expired.load(Ordering::Acquire) {
            SessionState::Expired
        } else {
            SessionState::Anonymous
        }
    }

    /// Observe pair changes. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Option<CredentialPair>> {
        self.pair_tx.subscribe()
    }

    /// Adopt whatever another context last wrote to storage, unconditionally.
    ///
    /// Last writer wins; fields are never merged. Runs under the write lock,
    /// so a local `set` is never overwritten by the record it is replacing.
    pub fn adopt_external(&self) -> Adoption {
        let _write = self.write.lock();
        let latest = load_or_none(self.storage.as_ref());
        let changed = self.pair_tx.send_if_modified(|current| {
            if *current == latest {
                return false;
            }
            *current = latest.clone();
            true
        });
        if !changed {
            return Adoption::Unchanged;
        }

        if latest.is_some() {
            self.expired.store(false, Ordering::Release);
        }
        let access_expires_at = latest.as_ref().map(|p| p.access_expires_at);
        info!(present = latest.is_some(), "adopted credentials from another context");
        let _ = self.events.send(SessionEvent::Adopted { access_expires_at });
        if latest.is_some() {
            Adoption::Installed
        } else {
            Adoption::Cleared
        }
    }
}

fn load_or_none(storage: &dyn PersistentStorage) -> Option<CredentialPair> {
    match storage.load() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(err = %e, "unreadable persisted credentials, treating as signed out");
            None
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
