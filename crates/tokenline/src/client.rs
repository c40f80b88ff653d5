// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request client.
//!
//! Attaches the current access credential to each call. A 401 triggers one
//! coordinated refresh and exactly one retry; a second 401 ends the session.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::coordinator::RefreshCoordinator;
use crate::error::AuthError;
use crate::signal::UnauthorizedSignal;
use crate::store::CredentialStore;

/// Default API base when none is configured.
pub const DEFAULT_API_BASE: &str = "http://localhost/api";

/// An outbound call, before credentials are attached.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Absolute URL when it starts with `http`, otherwise relative to the API base.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: HeaderMap::new(), body: None, retried: false }
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> anyhow::Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Whether this request already went through a refresh-triggered retry.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// The bearer credential attached to this request, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
    }

    fn with_access(&self, access: Option<&str>) -> Self {
        let mut req = self.clone();
        req.headers.remove(AUTHORIZATION);
        if let Some(access) = access {
            match HeaderValue::from_str(&format!("Bearer {access}")) {
                Ok(value) => {
                    req.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("access credential is not a valid header value, sending anonymously"),
            }
        }
        req
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON. An empty body reads as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        if self.body.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn a non-success status into an error carrying the server's `detail`.
    pub fn error_for_status(self) -> anyhow::Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        let detail = serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("detail").cloned());
        match detail {
            Some(serde_json::Value::String(s)) => anyhow::bail!("HTTP {}: {s}", self.status),
            Some(other) => anyhow::bail!("HTTP {}: {other}", self.status),
            None => anyhow::bail!("HTTP {}", self.status),
        }
    }
}

/// Performs one HTTP call. Errors are transport failures only; any status
/// code, 401 included, is an `Ok` response.
pub trait Transport: Send + Sync {
    fn call(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApiResponse>> + Send + '_>>;
}

/// `reqwest`-backed transport resolving paths against an API base.
pub struct HttpTransport {
    client: reqwest::Client,
    api_base: String,
}

impl HttpTransport {
    pub fn new(api_base: &str, timeout: Duration) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_base))
    }

    pub fn with_client(client: reqwest::Client, api_base: &str) -> Self {
        Self { client, api_base: api_base.trim_end_matches('/').to_owned() }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Absolute URL for `path`.
    pub fn resolve(&self, path: &str) -> String {
        resolve_url(&self.api_base, path)
    }

    async fn do_call(&self, request: ApiRequest) -> anyhow::Result<ApiResponse> {
        let mut builder =
            self.client.request(request.method, self.resolve(&request.path)).headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        Ok(ApiResponse { status, headers, body })
    }
}

impl Transport for HttpTransport {
    fn call(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApiResponse>> + Send + '_>> {
        Box::pin(self.do_call(request))
    }
}

/// Paths starting with `http` are used verbatim.
pub fn resolve_url(api_base: &str, path: &str) -> String {
    if path.starts_with("http") {
        return path.to_owned();
    }
    let base = api_base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

pub struct AuthClient {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    signal: Arc<UnauthorizedSignal>,
}

impl AuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        signal: Arc<UnauthorizedSignal>,
    ) -> Self {
        Self { transport, store, coordinator, signal }
    }

    /// Send `request` with the current access credential.
    ///
    /// Returns the transport's response unchanged apart from the single
    /// refresh-and-retry on 401. Transport errors propagate as-is.
    pub async fn send(&self, mut request: ApiRequest) -> anyhow::Result<ApiResponse> {
        loop {
            let access = self.store.get().map(|p| p.access);
            let response = self.transport.call(request.with_access(access.as_deref())).await?;
            if !response.is_unauthorized() {
                return Ok(response);
            }

            if request.retried {
                warn!(
                    path = %request.path,
                    err = %AuthError::RetryExhausted,
                    "still unauthorized after refresh"
                );
                self.signal.raise();
                return Ok(response);
            }

            request.retried = true;
            debug!(path = %request.path, "unauthorized, refreshing before retry");
            if let Err(e) = self.coordinator.ensure_fresh().await {
                // Only fatal failures end the session. An unreachable refresh
                // endpoint or a logout mid-exchange returns the 401 quietly.
                if e.is_fatal() {
                    self.signal.raise();
                } else {
                    warn!(path = %request.path, err = %e, "refresh did not complete, returning 401");
                }
                return Ok(response);
            }
        }
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<ApiResponse> {
        self.send(ApiRequest::new(Method::GET, path)).await
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<ApiResponse> {
        self.send(ApiRequest::new(Method::DELETE, path)).await
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> anyhow::Result<ApiResponse> {
        self.send(ApiRequest::new(Method::POST, path).json(body)?).await
    }

    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> anyhow::Result<ApiResponse> {
        self.send(ApiRequest::new(Method::PATCH, path).json(body)?).await
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
