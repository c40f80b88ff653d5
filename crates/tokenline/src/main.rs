// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use tokenline::config::{Command, Config, LoginArgs, RequestArgs};
use tokenline::storage::FileStorage;
use tokenline::{ApiRequest, CredentialPair, Session};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);
    tokenline::ensure_crypto_provider();

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries command output.
    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<i32> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)?;
    let storage = Arc::new(FileStorage::new(&state_dir));
    info!(record = %storage.path().display(), api_base = %config.api_base, "opening session");

    let session = Session::open_http(
        storage,
        Arc::new(|| eprintln!("session expired: run `tokenline login` to sign in again")),
        &config.session_options(),
    )?;

    match config.command {
        Command::Login(ref args) => login(&session, args),
        Command::Logout => {
            session.logout();
            print_status(&session)
        }
        Command::Status => print_status(&session),
        Command::Refresh => refresh(&session).await,
        Command::Request(ref args) => request(&session, args).await,
        Command::Watch => watch(&session).await,
    }
}

fn print_status(session: &Session) -> anyhow::Result<i32> {
    println!("{}", serde_json::to_string(&session.status())?);
    Ok(0)
}

fn login(session: &Session, args: &LoginArgs) -> anyhow::Result<i32> {
    let pair = CredentialPair::from_ttl(
        args.access.clone(),
        args.refresh.clone(),
        args.expires_in.unwrap_or(0),
    );
    session.login(pair);
    print_status(session)
}

async fn refresh(session: &Session) -> anyhow::Result<i32> {
    if let Err(e) = session.pair() {
        eprintln!("error: {e}: run `tokenline login` first");
        return Ok(1);
    }
    match session.coordinator().ensure_fresh().await {
        Ok(()) => print_status(session),
        Err(e) => {
            eprintln!("error: refresh failed: {e}");
            Ok(1)
        }
    }
}

async fn request(session: &Session, args: &RequestArgs) -> anyhow::Result<i32> {
    let mut req = ApiRequest::new(args.method()?, args.path.clone());
    if let Some(ref body) = args.body {
        let value: serde_json::Value = serde_json::from_str(body)?;
        req = req.json(&value)?;
    }

    let resp = session.client().send(req).await?;
    println!("{}", resp.status);
    if !resp.body.is_empty() {
        println!("{}", pretty_body(&resp.body));
    }
    Ok(if resp.status.is_success() { 0 } else { 1 })
}

/// Pretty-print JSON bodies, pass anything else through.
fn pretty_body(body: &Bytes) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

async fn watch(session: &Session) -> anyhow::Result<i32> {
    let mut events = session.subscribe();
    print_status(session)?;
    info!("watching session, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.shutdown();
    Ok(0)
}
