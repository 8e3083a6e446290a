//! HTTP tunnel — forwards a request to the remote instance and relays the
//! response verbatim.
//!
//! The caller-facing contract is "always returns a response, never fails":
//! any transport problem (refused connection, timeout, bad target) surfaces
//! as a synthetic `502 Bad Gateway` with a JSON error body.

use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::error;

use crate::state::AppState;

type HttpClient = hyper_util::client::legacy::Client<HttpConnector, Body>;

/// Hop-by-hop request headers that must not be forwarded.
const REQUEST_SKIP_HEADERS: [&str; 5] = [
    "host",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "upgrade",
];

/// Response headers dropped so the local transport recomputes framing.
const RESPONSE_STRIP_HEADERS: [&str; 3] =
    ["transfer-encoding", "content-encoding", "content-length"];

/// Shared pooled session for proxied requests.
///
/// Created lazily on first use, recreated if previously closed, and closed
/// exactly once at process shutdown by main.
#[derive(Default)]
pub struct ProxySession {
    inner: Mutex<Option<HttpClient>>,
}

impl ProxySession {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self) -> HttpClient {
        let mut inner = self.inner.lock().await;
        inner
            .get_or_insert_with(|| {
                hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build_http()
            })
            .clone()
    }

    /// Drop the pooled client. The next proxied request recreates it.
    pub async fn close(&self) {
        self.inner.lock().await.take();
    }
}

/// Forward `req` to the remote instance and relay status, headers, and body.
pub async fn forward(state: AppState, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    let mut target = format!("{}{path}", state.config.remote.url);
    if let Some(query) = parts.uri.query() {
        target.push('?');
        target.push_str(query);
    }
    let target: Uri = match target.parse() {
        Ok(uri) => uri,
        Err(e) => return bad_gateway(&method, &path, &e),
    };

    let mut builder = hyper::Request::builder().method(parts.method).uri(target);
    for (name, value) in &parts.headers {
        if !REQUEST_SKIP_HEADERS.contains(&name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    // Body streams through untouched; hyper reframes it for the upstream leg.
    let outgoing = match builder.body(body) {
        Ok(request) => request,
        Err(e) => return bad_gateway(&method, &path, &e),
    };

    let session = state.proxy_session.get().await;
    let timeout = Duration::from_secs(state.config.remote.timeout_secs);
    let response = match tokio::time::timeout(timeout, session.request(outgoing)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return bad_gateway(&method, &path, &e),
        Err(_) => {
            return bad_gateway(
                &method,
                &path,
                &format!("timed out after {}s", timeout.as_secs()),
            )
        }
    };

    let (mut resp_parts, resp_body) = response.into_parts();
    for name in RESPONSE_STRIP_HEADERS {
        resp_parts.headers.remove(name);
    }
    Response::from_parts(resp_parts, Body::new(resp_body))
}

fn bad_gateway(
    method: &hyper::Method,
    path: &str,
    cause: &dyn std::fmt::Display,
) -> Response {
    error!(%method, path, %cause, "Proxy request failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": format!("Remote LoRA Manager unavailable: {cause}"),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::AppState;
    use axum::http::HeaderMap;
    use axum::routing::any;
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn state_for(url: String) -> AppState {
        let mut config: Config = toml::from_str("").unwrap();
        config.remote.url = url;
        config.remote.timeout_secs = 5;
        AppState::new(config)
    }

    /// Echo backend: reports method, path, query, and received header names.
    fn echo_router() -> Router {
        Router::new().route(
            "/{*rest}",
            any(|req: Request| async move {
                let headers: Vec<String> =
                    req.headers().keys().map(|k| k.as_str().to_string()).collect();
                Json(json!({
                    "method": req.method().as_str(),
                    "path": req.uri().path(),
                    "query": req.uri().query(),
                    "headers": headers,
                }))
            }),
        )
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_forward_relays_method_path_query() {
        let url = serve(echo_router()).await;
        let state = state_for(url);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/lm/loras/list?page_size=10")
            .body(Body::empty())
            .unwrap();
        let response = forward(state, req).await;
        assert_eq!(response.status(), StatusCode::OK);

        let echoed = body_json(response).await;
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["path"], "/api/lm/loras/list");
        assert_eq!(echoed["query"], "page_size=10");
    }

    #[tokio::test]
    async fn test_forward_strips_hop_by_hop_request_headers() {
        let url = serve(echo_router()).await;
        let state = state_for(url);

        let req = axum::http::Request::builder()
            .method("GET")
            .uri("/api/lm/loras/list")
            .header("host", "localhost:9188")
            .header("connection", "keep-alive")
            .header("x-custom", "kept")
            .body(Body::empty())
            .unwrap();
        let echoed = body_json(forward(state, req).await).await;

        let headers: Vec<String> = echoed["headers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(headers.contains(&"x-custom".to_string()));
        assert!(!headers.contains(&"connection".to_string()));
        // hyper sets its own host header for the upstream leg; the inbound
        // value must not survive the trip
    }

    #[tokio::test]
    async fn test_forward_strips_response_framing_headers() {
        let router = Router::new().route(
            "/{*rest}",
            any(|| async {
                let mut headers = HeaderMap::new();
                headers.insert("content-encoding", "gzip".parse().unwrap());
                headers.insert("x-remote", "yes".parse().unwrap());
                (headers, "payload")
            }),
        );
        let url = serve(router).await;
        let state = state_for(url);

        let req = axum::http::Request::builder()
            .uri("/api/lm/anything")
            .body(Body::empty())
            .unwrap();
        let response = forward(state, req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("content-encoding").is_none());
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.headers().get("x-remote").unwrap(), "yes");
    }

    #[tokio::test]
    async fn test_forward_unreachable_remote_yields_502() {
        let state = state_for("http://127.0.0.1:9".to_string());
        let req = axum::http::Request::builder()
            .uri("/api/lm/loras/list")
            .body(Body::empty())
            .unwrap();
        let response = forward(state, req).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("Remote LoRA Manager unavailable"));
    }
}
