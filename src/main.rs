//! Frameproxy - rewriting web proxy for framed browsing
//!
//! Fetches pages on behalf of a client, rewrites their links, forms and
//! subresources so every later navigation routes back through the proxy, and
//! injects a runtime interceptor for navigations created by scripts.

mod analyze;
mod codec;
mod config;
mod error;
mod fetch;
mod handlers;
mod headers;
mod interceptor;
#[cfg(test)]
mod interceptor_harness;
mod links;
mod models;
mod navigation;
mod profiles;
mod resolver;
mod rewriter;
mod validation;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    config::Config,
    handlers::{router, AppState},
    navigation::SearchEngine,
};

/// Create the timeout layer (separate function to allow #[allow(deprecated)])
#[allow(deprecated)]
fn create_timeout_layer(timeout_secs: u64) -> tower_http::timeout::TimeoutLayer {
    tower_http::timeout::TimeoutLayer::new(Duration::from_secs(timeout_secs))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let search = SearchEngine::new(&config.search_engine)
        .with_context(|| format!("invalid SEARCH_ENGINE host: {}", config.search_engine))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        max_concurrent = config.max_concurrent,
        page_timeout = config.page_timeout,
        probe_timeout = config.probe_timeout,
        max_request_body_size = config.max_request_body_size,
        max_response_body_size = config.max_response_body_size,
        server_timeout = config.server_timeout,
        search_engine = %search.host(),
        public_base_url = ?config.public_base_url.as_ref().map(|u| u.as_str()),
        allow_private_ips = config.allow_private_ips,
        "Starting frameproxy"
    );

    info!(
        header_profiles = profiles::header_profile_names().len(),
        emulations = profiles::emulation_names().len(),
        "Loaded header profiles"
    );

    let state = AppState::new(config.clone(), search);

    // Layers are applied bottom-up; the last one added is the outermost
    let app = router(state)
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(create_timeout_layer(config.server_timeout));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
