// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive refresh scheduler.
//!
//! One task owns the only timer. Every store change drops the pending sleep
//! and arms a new one against the new pair's expiry; an empty store leaves
//! nothing armed. The task stops when the scheduler is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::RefreshCoordinator;
use crate::pair::{epoch_ms, CredentialPair};
use crate::store::CredentialStore;

/// The timer currently armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    /// Increments on every arm, so a replacement is distinguishable from
    /// the timer it replaced.
    pub generation: u64,
    /// Delay computed when armed.
    pub delay: Duration,
    /// Expiry of the pair the timer was armed for (epoch ms).
    pub access_expires_at: u64,
}

pub struct RefreshScheduler {
    armed: watch::Receiver<Option<ArmedTimer>>,
    cancel: CancellationToken,
}

impl RefreshScheduler {
    /// Spawn the scheduler task. It arms immediately if the store holds a pair.
    pub fn spawn(
        store: &CredentialStore,
        coordinator: Arc<RefreshCoordinator>,
        early_margin: Duration,
        shutdown: &CancellationToken,
    ) -> Self {
        let cancel = shutdown.child_token();
        let (armed_tx, armed) = watch::channel(None);
        let pairs = store.subscribe();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run(pairs, coordinator, early_margin, armed_tx, task_cancel).await;
        });

        Self { armed, cancel }
    }

    /// The timer currently armed, if any.
    pub fn armed(&self) -> Option<ArmedTimer> {
        *self.armed.borrow()
    }

    /// Observe arm/disarm transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<ArmedTimer>> {
        self.armed.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Delay until `margin` before expiry, clamped at zero.
pub fn refresh_delay(access_expires_at: u64, now_ms: u64, margin: Duration) -> Duration {
    let fire_at = access_expires_at.saturating_sub(margin.as_millis() as u64);
    Duration::from_millis(fire_at.saturating_sub(now_ms))
}

async fn run(
    mut pairs: watch::Receiver<Option<CredentialPair>>,
    coordinator: Arc<RefreshCoordinator>,
    margin: Duration,
    armed_tx: watch::Sender<Option<ArmedTimer>>,
    cancel: CancellationToken,
) {
    let mut generation = 0u64;

    'outer: loop {
        let current = pairs.borrow_and_update().clone();
        let pair = match current {
            Some(pair) => pair,
            None => {
                if armed_tx.send_replace(None).is_some() {
                    debug!("refresh timer cancelled, no session");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = pairs.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }
        };

        generation += 1;
        let delay = refresh_delay(pair.access_expires_at, epoch_ms(), margin);
        armed_tx.send_replace(Some(ArmedTimer {
            generation,
            delay,
            access_expires_at: pair.access_expires_at,
        }));
        debug!(generation, delay_ms = delay.as_millis() as u64, "refresh timer armed");

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = pairs.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!(generation, "refresh timer replaced");
                continue;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        armed_tx.send_replace(None);
        debug!(generation, "refresh timer fired");
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = coordinator.ensure_fresh() => r,
        };

        // Success installs a new pair, which the next iteration arms against.
        if let Err(e) = result {
            info!(err = %e, "proactive refresh failed, waiting for a new session");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    changed = pairs.changed() => {
                        if changed.is_err() {
                            break 'outer;
                        }
                        // Only a different pair re-arms.
                        if pairs.borrow().as_ref() != Some(&pair) {
                            break;
                        }
                    }
                }
            }
        }
    }

    armed_tx.send_replace(None);
    debug!("refresh scheduler stopped");
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
