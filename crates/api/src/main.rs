//! Homeboard - household calendar display server.
//!
//! Loads configuration, opens the database, starts background sync and
//! serves the display and administrative HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Request;
use clap::Parser;
use homeboard_api::utils::logging::init_tracing;
use homeboard_api::{router, AppContext};
use homeboard_infra::config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

/// Household calendar aggregation server.
#[derive(Parser, Debug)]
#[command(name = "homeboard")]
#[command(about = "Calendar aggregation and live sync server", long_about = None)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,

    /// Configuration file; searched for in the usual locations when omitted.
    #[arg(long, env = "HOMEBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.bind_addr`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    let mut config = match args.config {
        Some(path) => config::load_from_file(Some(path))?,
        None => config::load()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    init_tracing(&config.logging)?;

    let bind_addr = config.server.bind_addr.clone();
    let ctx = Arc::new(AppContext::new(config).await?);
    ctx.start().await?;

    let app = router(Arc::clone(&ctx))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    query = request.uri().query().unwrap_or("")
                )
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "starting server");

    let shutdown_ctx = Arc::clone(&ctx);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // SSE streams never finish on their own
            let closed = shutdown_ctx.broadcaster.disconnect_all();
            tracing::info!(closed, "shutdown signal received");
        })
        .await?;

    ctx.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
