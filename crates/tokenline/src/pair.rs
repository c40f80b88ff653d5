// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The access/refresh credential pair and its wire mapping.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// An immutable access/refresh credential pair.
///
/// `access_expires_at` is fixed when the pair is created from a server TTL
/// and is never recomputed. A new pair always replaces the old one whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
    /// Access expiry as milliseconds since Unix epoch.
    #[serde(rename = "accessExpAt", default)]
    pub access_expires_at: u64,
}

impl CredentialPair {
    pub fn new(
        access: impl Into<String>,
        refresh: impl Into<String>,
        access_expires_at: u64,
    ) -> Self {
        Self { access: access.into(), refresh: refresh.into(), access_expires_at }
    }

    /// Build a pair whose access expiry is `ttl_secs` from now.
    pub fn from_ttl(access: impl Into<String>, refresh: impl Into<String>, ttl_secs: u64) -> Self {
        Self::new(access, refresh, epoch_ms().saturating_add(ttl_secs.saturating_mul(1000)))
    }

    /// Time left before the access credential expires (zero once past).
    pub fn time_until_expiry(&self) -> Duration {
        Duration::from_millis(self.access_expires_at.saturating_sub(epoch_ms()))
    }

    pub fn is_expired(&self) -> bool {
        self.access_expires_at <= epoch_ms()
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &redact(&self.access))
            .field("refresh", &redact(&self.refresh))
            .field("access_expires_at", &self.access_expires_at)
            .finish()
    }
}

fn redact(token: &str) -> String {
    let head: String = token.chars().take(4).collect();
    format!("{head}…({} chars)", token.chars().count())
}

/// Token pair as returned by the login and refresh endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access: String,
    pub refresh: String,
    /// Access token lifetime in seconds.
    #[serde(default, alias = "expires_in_seconds", alias = "expires_in")]
    pub access_expires_in: Option<u64>,
}

impl TokenResponse {
    /// Map to a pair, stamping the absolute expiry now. A missing TTL yields
    /// an already-stale pair.
    pub fn into_pair(self) -> CredentialPair {
        CredentialPair::from_ttl(self.access, self.refresh, self.access_expires_in.unwrap_or(0))
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "pair_tests.rs"]
mod tests;
