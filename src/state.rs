//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::client::RemoteManagerClient;
use crate::config::Config;
use crate::events::EventBus;
use crate::proxy::http::ProxySession;

/// Shared application state for the lmrelay server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Typed client for the remote LoRA Manager (listing caches, lookups).
    pub client: Arc<RemoteManagerClient>,
    /// Broadcast channel carrying widget events to locally connected
    /// frontends. Handlers emit into it; `/ws` listeners drain it.
    pub events: EventBus,
    /// Shared pooled session for proxied HTTP requests, separate from the
    /// client's session. Closed once at shutdown.
    pub proxy_session: Arc<ProxySession>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        Self {
            client: Arc::new(RemoteManagerClient::new(config.clone())),
            config,
            start_time: Instant::now(),
            events: EventBus::default(),
            proxy_session: Arc::new(ProxySession::new()),
        }
    }
}
