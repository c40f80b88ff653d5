// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Failures in the credential lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No pair is installed.
    NoSession,
    /// The refresh credential was invalid or revoked. The session is over.
    ExchangeRejected(String),
    /// The exchange could not reach the server. The session survives; a later
    /// caller may try again.
    ExchangeUnavailable(String),
    /// Refresh failed for good; the store has been cleared.
    SessionExpired,
    /// The request was still rejected after a refresh-triggered retry.
    RetryExhausted,
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "NO_SESSION",
            Self::ExchangeRejected(_) => "EXCHANGE_REJECTED",
            Self::ExchangeUnavailable(_) => "EXCHANGE_UNAVAILABLE",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
        }
    }

    /// Whether this failure ends the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ExchangeRejected(_) | Self::SessionExpired | Self::RetryExhausted => true,
            Self::NoSession | Self::ExchangeUnavailable(_) => false,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("no session"),
            Self::ExchangeRejected(reason) => write!(f, "refresh rejected: {reason}"),
            Self::ExchangeUnavailable(reason) => write!(f, "refresh unavailable: {reason}"),
            Self::SessionExpired => f.write_str("session expired"),
            Self::RetryExhausted => f.write_str("request rejected after refresh"),
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
