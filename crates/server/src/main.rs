// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fortifyd: the fortify pipeline server binary.

use fortify_core::{PipelineConfig, SystemClock};
use fortify_engine::Pipeline;
use fortify_exec::{CliInvoker, ToolInvoker};
use fortify_server::{env, router, security, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = init_tracing();

    let project_root = env::project_root();
    let config = PipelineConfig::for_project(project_root.clone());
    let bind = env::bind_addr();

    let passcode = match env::passcode() {
        Some(passcode) => Some(passcode),
        None if is_loopback(&bind) => None,
        None => {
            // Never expose an unauthenticated console beyond loopback.
            let generated: String = security::generate_token().chars().take(16).collect();
            tracing::warn!(passcode = %generated, "no PASSCODE set on non-loopback bind; generated one");
            Some(generated)
        }
    };
    let session_secret = env::session_secret().unwrap_or_else(security::generate_token);

    let invoker: Arc<dyn ToolInvoker> = Arc::new(CliInvoker::new(&config));
    let pipeline = Pipeline::new(config, invoker, env::api_key(), SystemClock);
    pipeline.discover_targets()?;
    pipeline.start();

    let state = AppState::new(Arc::clone(&pipeline), passcode, session_secret, &project_root);
    let mut app = router(state.clone());
    if let Some(origin) = env::cors_origin() {
        app = app.layer(CorsLayer::new().allow_origin(origin.parse::<axum::http::HeaderValue>()?));
    }

    let listener = bind_with_retry(&bind, env::port()).await?;
    tracing::info!(addr = %listener.local_addr()?, "fortifyd listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    pipeline.shutdown().await;
    tracing::info!("fortifyd stopped");
    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::env::var("LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fortifyd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}

fn is_loopback(bind: &str) -> bool {
    matches!(bind, "127.0.0.1" | "localhost" | "::1")
}

/// Bind the preferred port, walk forward a bounded number of times on
/// conflict, then fall back to an OS-assigned port.
async fn bind_with_retry(host: &str, preferred: u16) -> std::io::Result<TcpListener> {
    for offset in 0..env::MAX_PORT_RETRIES {
        let port = preferred.saturating_add(offset);
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(port, error = %e, "port unavailable");
            }
        }
    }
    tracing::warn!(preferred, "preferred port range exhausted; using OS-assigned port");
    TcpListener::bind((host, 0)).await
}

async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => tracing::info!("interrupt received"),
        _ = term => tracing::info!("SIGTERM received"),
        _ = shutdown.cancelled() => {}
    }
}
