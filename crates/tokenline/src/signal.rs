// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unauthorized signal and session lifecycle events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

/// Lifecycle events broadcast to the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A pair was installed by an explicit login.
    Installed { access_expires_at: u64 },
    /// A refresh exchange produced a new pair.
    Refreshed { access_expires_at: u64 },
    /// A pair written by another context was adopted.
    Adopted { access_expires_at: Option<u64> },
    /// The pair was removed (logout or failed refresh).
    Cleared,
    /// The session is over; the host should prompt for re-authentication.
    Unauthorized,
}

/// Receives the unauthorized signal. The host typically opens a re-login prompt.
pub trait UnauthorizedSink: Send + Sync {
    fn unauthorized(&self);
}

impl<F> UnauthorizedSink for F
where
    F: Fn() + Send + Sync,
{
    fn unauthorized(&self) {
        self()
    }
}

/// Latches the unauthorized signal so the sink fires once per failure episode.
///
/// An episode ends when a pair is installed again ([`Self::rearm`]).
pub struct UnauthorizedSignal {
    sink: Arc<dyn UnauthorizedSink>,
    events: broadcast::Sender<SessionEvent>,
    raised: AtomicBool,
}

impl UnauthorizedSignal {
    pub fn new(sink: Arc<dyn UnauthorizedSink>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self { sink, events, raised: AtomicBool::new(false) }
    }

    /// Raise the signal. Returns `true` if this call reached the sink.
    pub fn raise(&self) -> bool {
        if self.raised.swap(true, Ordering::AcqRel) {
            tracing::debug!("unauthorized already raised for this episode");
            return false;
        }
        tracing::warn!("session unauthorized, re-authentication required");
        self.sink.unauthorized();
        let _ = self.events.send(SessionEvent::Unauthorized);
        true
    }

    /// Start a new episode.
    pub fn rearm(&self) {
        self.raised.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
