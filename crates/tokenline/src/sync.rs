// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::signal::UnauthorizedSignal;
use crate::store::{Adoption, CredentialStore};

/// Adopts credentials written by sibling contexts sharing the same storage.
///
/// Wakes on `notify` events for the record's directory, with a polling
/// fallback, and asks the store to reload the record. Adoption is
/// last-writer-wins; the watcher never writes. Adopting a pair starts a
/// new unauthorized episode, as a local login does.
pub struct StorageWatcher {
    path: Option<PathBuf>,
    poll_interval: Duration,
    signal: Option<Arc<UnauthorizedSignal>>,
}

impl StorageWatcher {
    /// `path` is the persisted record; `None` polls only.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, poll_interval: Duration::from_secs(2), signal: None }
    }

    /// Rearm `signal` whenever another context's pair is adopted.
    pub fn with_signal(mut self, signal: Arc<UnauthorizedSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, store: Arc<CredentialStore>, shutdown: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let watcher = self.setup_notify_watcher(wake_tx);
        if watcher.is_none() {
            debug!(path = ?self.path, "storage watch unavailable, polling only");
        }

        let mut poll_interval = tokio::time::interval(self.poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll_interval.tick() => {}
            }
            if store.adopt_external() == Adoption::Installed {
                if let Some(ref signal) = self.signal {
                    signal.rearm();
                }
            }
        }
    }

    /// Spawn [`Self::run`] on the runtime.
    pub fn spawn(self, store: Arc<CredentialStore>, shutdown: CancellationToken) {
        tokio::spawn(self.run(store, shutdown));
    }

    /// Watch the record's parent directory so creation and atomic renames
    /// are seen. Returns the watcher handle (must be kept alive).
    fn setup_notify_watcher(
        &self,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let path = self.path.as_ref()?;
        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;

        let watch_path = path.parent().unwrap_or(path.as_ref());
        watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;

        Some(watcher)
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
