// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod exchange;
pub mod pair;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod storage;
pub mod store;
pub mod sync;
pub mod test_support;

pub use client::{ApiRequest, ApiResponse, AuthClient};
pub use error::AuthError;
pub use pair::CredentialPair;
pub use session::{Session, SessionOptions};
pub use store::SessionState;

/// Install the process-wide rustls crypto provider (ring). Idempotent.
pub fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
