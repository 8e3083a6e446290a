#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # lmrelay
//!
//! Selective reverse proxy that sits in front of a local creative-pipeline
//! host and redirects LoRA Manager traffic to a remote instance, while
//! re-executing a handful of widget-event routes locally so their real-time
//! events reach the browsers connected *here*, not the remote's.
//!
//! ## Request handling
//!
//! | Classification | Paths                                    | Outcome                      |
//! |----------------|------------------------------------------|------------------------------|
//! | Local event    | 4 widget routes under `/api/lm/`         | parsed + event emitted here  |
//! | WebSocket      | `/ws/{fetch,download,init}-progress`     | bridged to remote            |
//! | HTTP proxy     | `/api/lm/`, static, locales, page routes | tunneled to remote (or 502)  |
//! | Passthrough    | everything else                          | host routes                  |
//!
//! With no `remote.url` configured the proxy layer is inert and every
//! request falls through to the host router.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, router setup, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! state.rs         — shared AppState (config, client, event bus, proxy session)
//! client.rs        — remote LoRA Manager client, 60s TTL listing caches
//! events.rs        — broadcast event bus + /ws listener endpoint
//! bridge.rs        — sync-over-async adapter for plugin call sites
//! proxy/
//!   mod.rs         — route tables, classifier, dispatch middleware
//!   http.rs        — HTTP tunnel, shared pooled session, 502 fallback
//!   ws.rs          — WebSocket bridge with first-completed-cancels semantics
//! routes/
//!   health.rs      — GET /api/health
//!   events.rs      — local widget-event handlers (trigger words, code, widget)
//! ```

use axum::{middleware, routing::get, Router};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lmrelay::{config::Config, events, proxy, routes, AppState};

/// Remote LoRA Manager relay for local creative-pipeline hosts.
#[derive(Parser)]
#[command(name = "lmrelay", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("lmrelay v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.remote.is_configured() {
        info!("Proxying LoRA Manager routes -> {}", config.remote.url);
    } else {
        warn!("No remote.url configured - proxy disabled, all requests fall through");
    }

    let state = AppState::new(config);

    // Host surface: health probe and the local event listener socket. The
    // dispatch middleware is layered on top so it sees every request first.
    let app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/ws", get(events::events_ws))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            proxy::dispatch,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // Cleanup: release both pooled sessions exactly once.
    info!("Shutting down...");
    state.proxy_session.close().await;
    state.client.close().await;
    info!("Goodbye");
}
