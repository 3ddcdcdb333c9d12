//! LLM gateway
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of OpenRouter API keys from the environment
//! 2. Accepts OpenAI-style chat completion requests
//! 3. Schedules each request across the pool, rotating away from keys that
//!    hit credit or rate limits and degrading retries to cheaper requests
//! 4. Exposes health, Prometheus metrics and a private admin API

mod admin;
mod chat;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use key_pool::{KeyPool, Scheduler};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::OpenRouterTransport;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;

/// Upper bound on graceful drain once a shutdown signal arrives. Long enough
/// for a request sitting in its last backoff to finish its final attempt.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    scheduler: Scheduler,
    started_at: tokio::time::Instant,
    prometheus: PrometheusHandle,
}

/// Build the public router. The concurrency limit caps in-flight requests at
/// `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, level from LOG_LEVEL or RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting llm-gateway");

    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        base_url = %config.upstream.base_url,
        keys = config.api_keys.len(),
        "configuration loaded"
    );

    let pool = Arc::new(KeyPool::new(config.api_keys).context("failed to build key pool")?);
    for index in 0..pool.len() {
        info!(key_index = index, key = %pool.preview(index), "key loaded");
    }
    metrics::set_available_keys(pool.len());

    let transport = OpenRouterTransport::new(
        reqwest::Client::new(),
        config.upstream.base_url.clone(),
        Duration::from_secs(config.upstream.timeout_secs),
    );
    let scheduler = Scheduler::new(pool.clone(), Arc::new(transport));

    let app_state = AppState {
        scheduler,
        started_at: tokio::time::Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);
    let admin_app = build_admin_router(AdminState::new(pool));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_addr)
        .await
        .with_context(|| format!("failed to bind admin to {}", config.server.admin_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    // Both listeners drain on the same signal. The drain timer starts when
    // the signal fires, not when the server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut public_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = public_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    let mut admin_rx = shutdown_rx;
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async move {
                let _ = admin_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }
    if let Err(e) = admin_handle.await {
        error!(error = %e, "admin task panicked");
    }

    info!("shutdown complete");
    Ok(())
}

/// Always 200: a degraded pool still serves through the least-errored key.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state
        .scheduler
        .pool()
        .snapshot(tokio::time::Instant::now());

    (
        axum::http::StatusCode::OK,
        axum::Json(serde_json::json!({
            "status": status.summary.health_status.label(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "available_keys": status.summary.available_keys,
            "total_keys": status.total_keys,
            "requests_served": status.summary.total_requests,
            "errors_total": status.summary.total_errors,
        })),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Dropping this future (client disconnect) abandons the scheduler loop.
async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    chat::complete(&state.scheduler, &body, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
