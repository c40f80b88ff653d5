// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::client::DEFAULT_API_BASE;
use crate::session::SessionOptions;

/// Client-side credential lifecycle for an HTTP API.
#[derive(Debug, Parser)]
#[command(name = "tokenline", version, about)]
pub struct Config {
    /// API base URL. Request paths not starting with `http` are resolved against it.
    #[arg(long, env = "TOKENLINE_API_BASE", default_value = DEFAULT_API_BASE, global = true)]
    pub api_base: String,

    /// Directory holding the persisted credential record.
    #[arg(long, env = "TOKENLINE_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "TOKENLINE_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TOKENLINE_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub refresh_early_ms: Option<u64>,
    #[clap(skip)]
    pub request_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub sync_poll_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Install a credential pair obtained from a login flow.
    Login(LoginArgs),
    /// Remove the stored credential pair.
    Logout,
    /// Print the session state as JSON.
    Status,
    /// Run one coordinated refresh exchange.
    Refresh,
    /// Send a request through the authenticated client.
    Request(RequestArgs),
    /// Keep the session fresh and follow other contexts until interrupted.
    Watch,
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct LoginArgs {
    /// Access credential.
    #[arg(long)]
    pub access: String,
    /// Refresh credential.
    #[arg(long)]
    pub refresh: String,
    /// Access credential lifetime in seconds (missing means already stale).
    #[arg(long)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PATCH, DELETE, ...).
    pub method: String,
    /// Path relative to the API base, or an absolute URL.
    pub path: String,
    /// JSON request body.
    #[arg(long)]
    pub body: Option<String>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let base = self.api_base.trim();
        if base.is_empty() {
            anyhow::bail!("--api-base must not be empty");
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            anyhow::bail!("--api-base must be an http(s) URL: {base}");
        }

        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }

        if let Command::Request(ref req) = self.command {
            req.method()?;
            if let Some(ref body) = req.body {
                serde_json::from_str::<serde_json::Value>(body)
                    .map_err(|e| anyhow::anyhow!("--body is not valid JSON: {e}"))?;
            }
        }
        Ok(())
    }

    duration_field!(refresh_early, refresh_early_ms, "TOKENLINE_REFRESH_EARLY_MS", 1_000);
    duration_field!(request_timeout, request_timeout_ms, "TOKENLINE_REQUEST_TIMEOUT_MS", 30_000);
    duration_field!(sync_poll, sync_poll_ms, "TOKENLINE_SYNC_POLL_MS", 2_000);

    /// State directory: `--state-dir`, then `$XDG_STATE_HOME/tokenline`,
    /// then `$HOME/.local/state/tokenline`, then `./.tokenline`.
    pub fn state_dir(&self) -> PathBuf {
        resolve_state_dir(
            self.state_dir.as_deref(),
            std::env::var_os("XDG_STATE_HOME"),
            std::env::var_os("HOME"),
        )
    }

    /// Session options for this configuration. Only `watch` runs the
    /// background scheduler and cross-context sync.
    pub fn session_options(&self) -> SessionOptions {
        let background = matches!(self.command, Command::Watch);
        SessionOptions {
            api_base: self.api_base.trim().to_owned(),
            refresh_early: self.refresh_early(),
            request_timeout: self.request_timeout(),
            proactive_refresh: background,
            sync_poll: background.then(|| self.sync_poll()),
        }
    }

    /// Build a minimal `Config` for tests.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            api_base: "http://127.0.0.1:9/api".into(),
            state_dir: None,
            log_format: "text".into(),
            log_level: "debug".into(),
            command: Command::Status,
            refresh_early_ms: Some(1_000),
            request_timeout_ms: Some(2_000),
            sync_poll_ms: Some(50),
        }
    }
}

impl RequestArgs {
    pub fn method(&self) -> anyhow::Result<reqwest::Method> {
        reqwest::Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid HTTP method: {}", self.method))
    }
}

/// Pure state directory resolution, see [`Config::state_dir`].
pub fn resolve_state_dir(
    explicit: Option<&Path>,
    xdg_state_home: Option<OsString>,
    home: Option<OsString>,
) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Some(xdg) = xdg_state_home.filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("tokenline");
    }
    if let Some(home) = home.filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local").join("state").join("tokenline");
    }
    PathBuf::from(".tokenline")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
