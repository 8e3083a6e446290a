#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

//! lmrelay library — exposes the proxy layer for embedding in a host server.
//!
//! This library re-exports the key building blocks:
//! - `proxy` — route classification, dispatch middleware, HTTP/WS tunnels
//! - `client` — typed client for the remote LoRA Manager (TTL-cached listings)
//! - `config` — configuration loading
//! - `events` — push-notification channel for locally connected frontends
//! - `routes` — local event handlers and the health endpoint
//! - `bridge` — sync-over-async adapter for host plugin call sites

pub mod bridge;
pub mod client;
pub mod config;
pub mod events;
pub mod proxy;
pub mod routes;
pub mod state;
pub mod util;

// Re-export key types at crate root for convenience.
pub use client::{ModelItem, RemoteManagerClient};
pub use config::Config;
pub use events::EventBus;
pub use proxy::RouteClass;
pub use state::AppState;
