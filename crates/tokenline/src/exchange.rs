// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh exchange: trade a refresh credential for a new pair.
//!
//! The exchanger only talks to the network. Writing the result into the
//! store is the coordinator's job.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::AuthError;
use crate::pair::{CredentialPair, TokenResponse};

/// Performs one refresh exchange. Never retries internally.
pub trait Exchanger: Send + Sync {
    fn exchange(
        &self,
        refresh: String,
    ) -> Pin<Box<dyn Future<Output = Result<CredentialPair, AuthError>> + Send + '_>>;
}

/// Error body returned by the auth endpoints.
#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

/// Exchanges against `POST {base}/auth/refresh` with `{"refresh": ...}`.
pub struct HttpExchanger {
    client: reqwest::Client,
    url: String,
}

impl HttpExchanger {
    pub fn new(api_base: &str, timeout: Duration) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_base))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: reqwest::Client, api_base: &str) -> Self {
        Self { client, url: format!("{}/auth/refresh", api_base.trim_end_matches('/')) }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn do_exchange(&self, refresh: &str) -> Result<CredentialPair, AuthError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "refresh": refresh }))
            .send()
            .await
            .map_err(|e| AuthError::ExchangeUnavailable(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::ExchangeUnavailable(format!("read body: {e}")))?;

        if !status.is_success() {
            let reason = failure_reason(status, &body);
            return Err(if is_rejection(status) {
                AuthError::ExchangeRejected(reason)
            } else {
                AuthError::ExchangeUnavailable(reason)
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::ExchangeUnavailable(format!("parse response: {e}")))?;
        Ok(token.into_pair())
    }
}

impl Exchanger for HttpExchanger {
    fn exchange(
        &self,
        refresh: String,
    ) -> Pin<Box<dyn Future<Output = Result<CredentialPair, AuthError>> + Send + '_>> {
        Box::pin(async move { self.do_exchange(&refresh).await })
    }
}

/// Whether a non-success status means the refresh credential itself is bad.
pub fn is_rejection(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::UNPROCESSABLE_ENTITY
    )
}

fn failure_reason(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorDetail>(body).ok().and_then(|e| e.detail);
    match detail {
        Some(serde_json::Value::String(s)) => format!("HTTP {status}: {s}"),
        Some(other) => format!("HTTP {status}: {other}"),
        None => format!("HTTP {status}"),
    }
}

#[cfg(test)]
#[path = "exchange_tests.rs"]
mod tests;
