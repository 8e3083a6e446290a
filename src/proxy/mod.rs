//! Selective reverse proxy in front of the host router.
//!
//! Layered onto the host application with
//! [`axum::middleware::from_fn_with_state`], so it inspects every request
//! before any host route can claim it. Per request the path is classified
//! into one of four terminal outcomes:
//!
//! 1. **Local event** — widget routes whose side effect (a push event to the
//!    local frontend) must happen here, not on the remote. Handled by
//!    [`crate::routes::events`], never proxied.
//! 2. **WebSocket** — progress streams, bridged to the remote with a
//!    duplicate upstream connection ([`ws`]).
//! 3. **HTTP proxy** — everything under the LoRA Manager API/static/page
//!    surface, tunneled verbatim ([`http`]).
//! 4. **Passthrough** — not a LoRA Manager route, fall through to the host.
//!
//! With no remote URL configured the whole layer is inert: every request
//! passes through, unconditionally and before any other check.

pub mod http;
pub mod ws;

use axum::{extract::Request, extract::State, middleware::Next, response::Response};

use crate::config::RemoteConfig;
use crate::routes::events;
use crate::state::AppState;

/// URL prefixes forwarded to the remote LoRA Manager.
const PROXY_PREFIXES: [&str; 4] = [
    "/api/lm/",
    "/loras_static/",
    "/locales/",
    "/example_images_static/",
];

/// Page routes served by the standalone LoRA Manager web UI.
const PROXY_PAGE_ROUTES: [&str; 5] = [
    "/loras",
    "/checkpoints",
    "/embeddings",
    "/loras/recipes",
    "/statistics",
];

/// WebSocket progress streams to bridge.
const WS_ROUTES: [&str; 3] = [
    "/ws/fetch-progress",
    "/ws/download-progress",
    "/ws/init-progress",
];

/// Terminal outcome for one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    LocalEvent,
    WebSocket,
    HttpProxy,
    Passthrough,
}

/// Classify a request path.
///
/// First match wins, and the order is a correctness requirement: the event
/// routes live *inside* the proxied `/api/lm/` prefix and must be caught
/// before the prefix check, otherwise their side effect would fire on the
/// remote's (disconnected) frontend instead of ours.
pub fn classify(remote: &RemoteConfig, path: &str) -> RouteClass {
    if !remote.is_configured() {
        return RouteClass::Passthrough;
    }
    if events::is_event_route(path) {
        return RouteClass::LocalEvent;
    }
    if WS_ROUTES.contains(&path) {
        return RouteClass::WebSocket;
    }
    if should_proxy(path) {
        return RouteClass::HttpProxy;
    }
    RouteClass::Passthrough
}

/// Prefix match on the API/static surface, exact or trailing-slash-insensitive
/// match on the page routes.
fn should_proxy(path: &str) -> bool {
    PROXY_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
        || PROXY_PAGE_ROUTES.contains(&path)
        || PROXY_PAGE_ROUTES.contains(&path.trim_end_matches('/'))
}

/// Dispatch middleware — the composition root of the proxy layer.
pub async fn dispatch(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match classify(&state.config.remote, req.uri().path()) {
        RouteClass::Passthrough => next.run(req).await,
        RouteClass::LocalEvent => events::dispatch_event(state, req).await,
        RouteClass::WebSocket => ws::bridge_upgrade(state, req).await,
        RouteClass::HttpProxy => http::forward(state, req).await,
    }
}
