//! Typed HTTP client for the remote LoRA Manager instance.
//!
//! Talks to the remote REST API:
//!
//! - `GET /api/lm/loras/list?page_size=9999` — paginated LoRA list
//! - `GET /api/lm/checkpoints/list?page_size=9999` — checkpoint list
//! - `GET /api/lm/loras/get-trigger-words?name=X` — per-LoRA trigger words
//! - `POST /api/lm/loras/random-sample` — server-side random selection
//! - `POST /api/lm/loras/cycler-list` — server-side sorted selection
//!
//! A short-lived in-memory cache of the two listings avoids a flood of list
//! calls while one workflow execution resolves many LoRAs at once. Every
//! public operation degrades to a neutral result on failure — a remote outage
//! must never abort a running workflow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use http_body_util::BodyExt;
use hyper::{header, Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::Config;
use crate::util::{encode_query_component, posix_basename};

/// How long a fetched listing stays fresh before the next use re-fetches.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Page size large enough to get the whole listing in one call.
const LIST_PAGE_SIZE: &str = "9999";

type HttpClient = hyper_util::client::legacy::Client<HttpConnector, Body>;

type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// One LoRA or checkpoint record as returned by the remote listing API.
///
/// Only the fields the relay derives data from are typed; everything else is
/// carried through opaquely so selection results keep their full shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelItem {
    #[serde(default)]
    pub file_name: String,
    /// Absolute path on the remote host, forward-slash separated.
    #[serde(default)]
    pub file_path: String,
    /// Subfolder under the model root (may be nested, may be empty).
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Legacy hash field, used when `sha256` is absent.
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub civitai: Option<CivitaiMeta>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Nested civitai metadata block; only the trigger words are of interest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CivitaiMeta {
    #[serde(default, rename = "trainedWords")]
    pub trained_words: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Which of the two cached listings an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingKind {
    Loras,
    Checkpoints,
}

impl ListingKind {
    fn list_path(self) -> &'static str {
        match self {
            Self::Loras => "/api/lm/loras/list",
            Self::Checkpoints => "/api/lm/checkpoints/list",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Loras => "loras",
            Self::Checkpoints => "checkpoints",
        }
    }
}

/// One cached listing: the items plus when they were fetched.
#[derive(Default)]
struct Listing {
    items: Arc<Vec<ModelItem>>,
    fetched_at: Option<Instant>,
}

impl Listing {
    /// Fresh ⇔ non-empty and younger than [`CACHE_TTL`]. A stale-but-present
    /// listing is still *served* when a refresh fails — freshness only decides
    /// whether to attempt the network call.
    fn is_fresh(&self) -> bool {
        !self.items.is_empty() && self.fetched_at.is_some_and(|at| at.elapsed() < CACHE_TTL)
    }
}

/// Client for the remote LoRA Manager REST API.
///
/// Explicitly constructed and shared through [`crate::state::AppState`] — one
/// instance per process, closed once at shutdown.
pub struct RemoteManagerClient {
    config: Arc<Config>,
    /// Pooled HTTP session: created on first use, recreated after `close()`.
    session: Mutex<Option<HttpClient>>,
    lora_cache: Mutex<Listing>,
    checkpoint_cache: Mutex<Listing>,
}

impl RemoteManagerClient {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            lora_cache: Mutex::new(Listing::default()),
            checkpoint_cache: Mutex::new(Listing::default()),
        }
    }

    /// Resolve a LoRA display name to `(relative_path, trigger_words)`.
    ///
    /// The relative path is what a local model loader can resolve under its
    /// LoRA root: `folder/basename` when the item has a subfolder, bare
    /// basename otherwise. The remote's absolute `file_path` first goes
    /// through the configured prefix mappings.
    ///
    /// Falls back to the per-name trigger-words endpoint when the listing has
    /// no such item; on total failure returns the input name itself so the
    /// caller can still attempt local resolution.
    pub async fn resolve_lora(&self, lora_name: &str) -> (String, Vec<String>) {
        let items = self.cached_listing(ListingKind::Loras).await;
        if let Some(item) = items.iter().find(|item| item.file_name == lora_name) {
            let mapped = self.config.remote.map_path(&item.file_path);
            let basename = posix_basename(&mapped);
            let relative = if item.folder.is_empty() {
                basename.to_string()
            } else {
                format!("{}/{basename}", item.folder)
            };
            let trigger_words = item
                .civitai
                .as_ref()
                .map(|meta| meta.trained_words.clone())
                .unwrap_or_default();
            return (relative, trigger_words);
        }

        match self
            .get_json(
                "/api/lm/loras/get-trigger-words",
                &[("name", lora_name)],
            )
            .await
        {
            Ok(data) => {
                let trigger_words = data
                    .get("trigger_words")
                    .and_then(Value::as_array)
                    .map(|words| {
                        words
                            .iter()
                            .filter_map(Value::as_str)
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                (lora_name.to_string(), trigger_words)
            }
            Err(e) => {
                warn!(lora = lora_name, error = %e, "LoRA lookup failed");
                (lora_name.to_string(), Vec::new())
            }
        }
    }

    /// SHA-256 hash for a LoRA by display name (`None` on miss or error).
    pub async fn lora_hash(&self, lora_name: &str) -> Option<String> {
        self.item_hash(ListingKind::Loras, lora_name).await
    }

    /// SHA-256 hash for a checkpoint by display name (`None` on miss or error).
    pub async fn checkpoint_hash(&self, checkpoint_name: &str) -> Option<String> {
        self.item_hash(ListingKind::Checkpoints, checkpoint_name).await
    }

    async fn item_hash(&self, kind: ListingKind, name: &str) -> Option<String> {
        let items = self.cached_listing(kind).await;
        let item = items.iter().find(|item| item.file_name == name)?;
        item.sha256.clone().or_else(|| item.hash.clone())
    }

    /// Ask the remote to pick random LoRAs matching the selection criteria.
    ///
    /// Randomness, weighting, and count logic all live on the remote side.
    /// Empty on any failure — callers must have their own fallback.
    pub async fn random_sample(&self, criteria: Value) -> Vec<ModelItem> {
        match self.post_json("/api/lm/loras/random-sample", &criteria).await {
            Ok(data) => Self::parse_selection(data),
            Err(e) => {
                warn!(error = %e, "random-sample request failed");
                Vec::new()
            }
        }
    }

    /// Ask the remote for a deterministically sorted LoRA list.
    ///
    /// Empty on any failure — callers must have their own fallback.
    pub async fn cycler_list(&self, criteria: Value) -> Vec<ModelItem> {
        match self.post_json("/api/lm/loras/cycler-list", &criteria).await {
            Ok(data) => Self::parse_selection(data),
            Err(e) => {
                warn!(error = %e, "cycler-list request failed");
                Vec::new()
            }
        }
    }

    /// Selection endpoints answer either a bare array or `{"loras": [...]}`.
    fn parse_selection(data: Value) -> Vec<ModelItem> {
        let items = match data {
            Value::Array(items) => Value::Array(items),
            Value::Object(mut map) => map.remove("loras").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        serde_json::from_value(items).unwrap_or_default()
    }

    /// Close the pooled session. The next request recreates it.
    pub async fn close(&self) {
        // Dropping the last clone tears down the connection pool.
        self.session.lock().await.take();
    }

    // ------------------------------------------------------------------
    // Cached list helpers
    // ------------------------------------------------------------------

    /// Return a listing, refreshing it when stale.
    ///
    /// The lock is only held for the cache check and the overwrite — never
    /// across the network fetch. Two tasks may race past the check and both
    /// fetch; the overwrite is idempotent and last-write-wins, bounded by the
    /// TTL window. On fetch failure the existing (possibly stale, possibly
    /// empty) items are served and a warning logged — never an error.
    async fn cached_listing(&self, kind: ListingKind) -> Arc<Vec<ModelItem>> {
        let cache = match kind {
            ListingKind::Loras => &self.lora_cache,
            ListingKind::Checkpoints => &self.checkpoint_cache,
        };

        {
            let listing = cache.lock().await;
            if listing.is_fresh() {
                return listing.items.clone();
            }
        }

        match self
            .get_json(kind.list_path(), &[("page_size", LIST_PAGE_SIZE)])
            .await
        {
            Ok(data) => {
                let items: Vec<ModelItem> = data
                    .get("items")
                    .cloned()
                    .map(|value| serde_json::from_value(value).unwrap_or_default())
                    .unwrap_or_default();
                let items = Arc::new(items);
                let mut listing = cache.lock().await;
                listing.items = items.clone();
                listing.fetched_at = Some(Instant::now());
                items
            }
            Err(e) => {
                warn!(
                    kind = kind.as_str(),
                    error = %e,
                    "Failed to refresh model listing, serving cached data"
                );
                cache.lock().await.items.clone()
            }
        }
    }

    /// Rewind both cache timestamps past the TTL (stale-serve tests).
    #[cfg(test)]
    async fn expire_caches(&self) {
        for cache in [&self.lora_cache, &self.checkpoint_cache] {
            let mut listing = cache.lock().await;
            listing.fetched_at = Instant::now().checked_sub(CACHE_TTL + Duration::from_secs(1));
        }
    }

    // ------------------------------------------------------------------
    // Core HTTP helpers
    // ------------------------------------------------------------------

    /// Pooled session, created lazily and recreated after [`close`](Self::close).
    async fn http_session(&self) -> HttpClient {
        let mut session = self.session.lock().await;
        session
            .get_or_insert_with(|| {
                hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build_http()
            })
            .clone()
    }

    fn build_uri(&self, path: &str, query: &[(&str, &str)]) -> Result<Uri, ClientError> {
        let mut url = format!("{}{path}", self.config.remote.url);
        for (i, (key, value)) in query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            url.push(sep);
            url.push_str(key);
            url.push('=');
            url.push_str(&encode_query_component(value));
        }
        Ok(url.parse()?)
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ClientError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.build_uri(path, query)?)
            .body(Body::empty())?;
        self.request_json(request).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.build_uri(path, &[])?)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?;
        self.request_json(request).await
    }

    async fn request_json(&self, request: Request<Body>) -> Result<Value, ClientError> {
        if !self.config.remote.is_configured() {
            return Err("no remote LoRA Manager configured".into());
        }
        let timeout = Duration::from_secs(self.config.remote.timeout_secs);
        let session = self.http_session().await;
        let response = tokio::time::timeout(timeout, session.request(request))
            .await
            .map_err(|_| format!("request timed out after {}s", timeout.as_secs()))??;
        if !response.status().is_success() {
            return Err(format!("remote returned {}", response.status()).into());
        }
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PathMapping};
    use axum::{extract::State, routing::get, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts list-endpoint hits so cache behavior is observable.
    #[derive(Clone, Default)]
    struct Hits(Arc<AtomicUsize>);

    fn lora_item() -> Value {
        json!({
            "file_name": "x",
            "file_path": "/mnt/loras/anime/x.safetensors",
            "folder": "anime",
            "sha256": "abc123",
            "civitai": {"trainedWords": ["t1", "t2"]},
            "usage_tips": "{}",
        })
    }

    fn listing_router(hits: Hits) -> Router {
        Router::new()
            .route(
                "/api/lm/loras/list",
                get(|State(hits): State<Hits>| async move {
                    hits.0.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"items": [lora_item()]}))
                }),
            )
            .route(
                "/api/lm/checkpoints/list",
                get(|| async {
                    Json(json!({"items": [
                        {"file_name": "ck", "file_path": "/mnt/ckpt/ck.safetensors", "folder": "", "hash": "legacy"},
                    ]}))
                }),
            )
            .with_state(hits)
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(url: String, mappings: Vec<PathMapping>) -> RemoteManagerClient {
        let mut config: Config = toml::from_str("").unwrap();
        config.remote.url = url;
        config.remote.timeout_secs = 5;
        config.remote.path_mappings = mappings;
        RemoteManagerClient::new(Arc::new(config))
    }

    #[tokio::test]
    async fn test_resolve_lora_builds_relative_path() {
        let url = serve(listing_router(Hits::default())).await;
        let client = client_for(url, vec![]);

        let (path, words) = client.resolve_lora("x").await;
        assert_eq!(path, "anime/x.safetensors");
        assert_eq!(words, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_lora_empty_folder_ignores_mapping() {
        // Mapping rewrites file_path but the relative result is basename-only
        // because folder is empty.
        let router = Router::new().route(
            "/api/lm/loras/list",
            get(|| async {
                Json(json!({"items": [
                    {"file_name": "x", "file_path": "/mnt/loras/x.safetensors", "folder": ""},
                ]}))
            }),
        );
        let url = serve(router).await;
        let client = client_for(
            url,
            vec![PathMapping {
                remote: "/mnt/loras".to_string(),
                local: "/local/loras".to_string(),
            }],
        );

        let (path, words) = client.resolve_lora("x").await;
        assert_eq!(path, "x.safetensors");
        assert!(words.is_empty());
    }

    #[tokio::test]
    async fn test_listing_cached_within_ttl() {
        let hits = Hits::default();
        let url = serve(listing_router(hits.clone())).await;
        let client = client_for(url, vec![]);

        client.resolve_lora("x").await;
        client.resolve_lora("x").await;
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_served_when_refresh_fails() {
        let hits = Hits::default();
        // First list call succeeds, every later refresh attempt fails.
        let router = Router::new()
            .route(
                "/api/lm/loras/list",
                get(|State(hits): State<Hits>| async move {
                    if hits.0.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(Json(json!({"items": [lora_item()]})))
                    } else {
                        Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                    }
                }),
            )
            .with_state(hits.clone());
        let url = serve(router).await;
        let client = client_for(url, vec![]);

        let before = client.resolve_lora("x").await;
        assert_eq!(before.0, "anime/x.safetensors");

        client.expire_caches().await;
        let after = client.resolve_lora("x").await;
        assert_eq!(after, before);
        assert_eq!(hits.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_lora_falls_back_to_trigger_words_endpoint() {
        let router = Router::new()
            .route(
                "/api/lm/loras/list",
                get(|| async { Json(json!({"items": []})) }),
            )
            .route(
                "/api/lm/loras/get-trigger-words",
                get(|| async { Json(json!({"trigger_words": ["fallback"]})) }),
            );
        let url = serve(router).await;
        let client = client_for(url, vec![]);

        let (path, words) = client.resolve_lora("missing").await;
        assert_eq!(path, "missing");
        assert_eq!(words, vec!["fallback".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_lora_total_failure_returns_name() {
        // Nothing listening on this port.
        let client = client_for("http://127.0.0.1:9".to_string(), vec![]);
        let (path, words) = client.resolve_lora("orphan").await;
        assert_eq!(path, "orphan");
        assert!(words.is_empty());
    }

    #[tokio::test]
    async fn test_hash_precedence_sha256_then_legacy() {
        let url = serve(listing_router(Hits::default())).await;
        let client = client_for(url, vec![]);

        assert_eq!(client.lora_hash("x").await.as_deref(), Some("abc123"));
        // Checkpoint item has only the legacy field
        assert_eq!(client.checkpoint_hash("ck").await.as_deref(), Some("legacy"));
        assert_eq!(client.lora_hash("nope").await, None);
    }

    #[tokio::test]
    async fn test_random_sample_both_response_shapes() {
        let router = Router::new()
            .route(
                "/api/lm/loras/random-sample",
                post(|| async { Json(json!([{"file_name": "bare"}])) }),
            )
            .route(
                "/api/lm/loras/cycler-list",
                post(|| async { Json(json!({"loras": [{"file_name": "wrapped"}]})) }),
            );
        let url = serve(router).await;
        let client = client_for(url, vec![]);

        let sampled = client.random_sample(json!({"count": 1})).await;
        assert_eq!(sampled.len(), 1);
        assert_eq!(sampled[0].file_name, "bare");

        let cycled = client.cycler_list(json!({"sort": "name"})).await;
        assert_eq!(cycled.len(), 1);
        assert_eq!(cycled[0].file_name, "wrapped");
    }

    #[tokio::test]
    async fn test_selection_failure_returns_empty() {
        let client = client_for("http://127.0.0.1:9".to_string(), vec![]);
        assert!(client.random_sample(json!({})).await.is_empty());
        assert!(client.cycler_list(json!({})).await.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_client_refuses_to_act() {
        let client = client_for(String::new(), vec![]);
        let (path, words) = client.resolve_lora("x").await;
        assert_eq!(path, "x");
        assert!(words.is_empty());
        assert!(client.random_sample(json!({})).await.is_empty());
    }
}
