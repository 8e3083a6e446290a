//! Local handlers for the widget-event routes.
//!
//! On the remote side these four routes broadcast to the remote's own —
//! disconnected — frontend, which is useless. Re-executing their observable
//! side effect locally is the whole point of this layer: each handler parses
//! a JSON body and pushes one event per target through the [`EventBus`],
//! while every other aspect of the route stays delegated to the remote.
//!
//! | Route                              | Event                  |
//! |------------------------------------|------------------------|
//! | `/api/lm/loras/get_trigger_words`  | `trigger_word_update`  |
//! | `/api/lm/update-lora-code`         | `lora_code_update`     |
//! | `/api/lm/update-node-widget`       | `lm_widget_update`     |
//! | `/api/lm/register-nodes`           | — (no-op)              |

use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::events::EventBus;
use crate::state::AppState;

const TRIGGER_WORDS: &str = "/api/lm/loras/get_trigger_words";
const LORA_CODE: &str = "/api/lm/update-lora-code";
const NODE_WIDGET: &str = "/api/lm/update-node-widget";
const REGISTER_NODES: &str = "/api/lm/register-nodes";

/// Widget event bodies are tiny; anything bigger is malformed.
const EVENT_BODY_LIMIT: usize = 1024 * 1024;

/// Trigger words are joined with the same separator the frontend widget
/// splits on.
const TRIGGER_WORD_SEPARATOR: &str = ",, ";

/// Whether `path` is one of the locally handled event routes.
pub fn is_event_route(path: &str) -> bool {
    matches!(path, TRIGGER_WORDS | LORA_CODE | NODE_WIDGET | REGISTER_NODES)
}

/// A frontend node reference: either a bare identifier or an identifier
/// scoped to a subgraph.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Scoped {
        node_id: Value,
        #[serde(default)]
        graph_id: Option<Value>,
    },
    Simple(Value),
}

impl NodeRef {
    /// Normalize to `(id, graph_id)`. String ids that parse as integers are
    /// coerced; anything else passes through as-is.
    pub fn normalized(&self) -> (Value, Option<Value>) {
        match self {
            Self::Scoped { node_id, graph_id } => (coerce_id(node_id), graph_id.clone()),
            Self::Simple(value) => (coerce_id(value), None),
        }
    }
}

fn coerce_id(raw: &Value) -> Value {
    match raw {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| raw.clone()),
        other => other.clone(),
    }
}

/// Build the per-target event payload: `base` plus `id` and, for scoped
/// targets, `graph_id`.
fn target_payload(node: &NodeRef, base: &Value) -> Value {
    let (id, graph_id) = node.normalized();
    let mut payload = base.clone();
    payload["id"] = id;
    if let Some(graph_id) = graph_id {
        payload["graph_id"] = graph_id;
    }
    payload
}

/// Entry point from the dispatch middleware for all four event routes.
pub async fn dispatch_event(state: AppState, req: Request) -> Response {
    let path = req.uri().path().to_string();

    // Registration has no meaning against a remote registry.
    if path == REGISTER_NODES {
        return Json(json!({"success": true})).into_response();
    }

    let bytes = match axum::body::to_bytes(req.into_body(), EVENT_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => return bad_request(&format!("failed to read request body: {e}")),
    };

    match path.as_str() {
        TRIGGER_WORDS => match serde_json::from_slice(&bytes) {
            Ok(body) => get_trigger_words(&state, body).await,
            Err(e) => bad_request(&format!("invalid trigger-words request: {e}")),
        },
        LORA_CODE => match serde_json::from_slice(&bytes) {
            Ok(body) => update_lora_code(&state.events, &body),
            Err(e) => bad_request(&format!("invalid lora-code request: {e}")),
        },
        NODE_WIDGET => match serde_json::from_slice(&bytes) {
            Ok(body) => update_node_widget(&state.events, &body),
            Err(e) => bad_request(&format!("invalid widget-update request: {e}")),
        },
        _ => bad_request("unknown event route"),
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn success() -> Response {
    Json(json!({"success": true})).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TriggerWordsRequest {
    #[serde(default)]
    pub lora_names: Vec<String>,
    #[serde(default)]
    pub node_ids: Vec<NodeRef>,
}

/// Resolve trigger words for all requested LoRAs and push the combined
/// string to every target node.
async fn get_trigger_words(state: &AppState, body: TriggerWordsRequest) -> Response {
    let mut all_words = Vec::new();
    for name in &body.lora_names {
        let (_, words) = state.client.resolve_lora(name).await;
        all_words.extend(words);
    }
    let message = all_words.join(TRIGGER_WORD_SEPARATOR);

    let base = json!({"message": message});
    for node in &body.node_ids {
        state
            .events
            .emit("trigger_word_update", target_payload(node, &base));
    }
    success()
}

#[derive(Debug, Deserialize)]
pub struct CodeUpdateRequest {
    /// Absent/null means broadcast to every listening node.
    #[serde(default)]
    pub node_ids: Option<Vec<NodeRef>>,
    #[serde(default)]
    pub lora_code: String,
    #[serde(default)]
    pub mode: String,
}

fn update_lora_code(events: &EventBus, body: &CodeUpdateRequest) -> Response {
    let base = json!({"lora_code": body.lora_code, "mode": body.mode});
    match &body.node_ids {
        None => {
            // Sentinel id -1 = broadcast
            let mut payload = base;
            payload["id"] = json!(-1);
            events.emit("lora_code_update", payload);
        }
        Some(nodes) => {
            for node in nodes {
                events.emit("lora_code_update", target_payload(node, &base));
            }
        }
    }
    success()
}

#[derive(Debug, Deserialize)]
pub struct WidgetUpdateRequest {
    #[serde(default)]
    pub widget_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub node_ids: Vec<NodeRef>,
}

fn update_node_widget(events: &EventBus, body: &WidgetUpdateRequest) -> Response {
    let (Some(widget_name), Some(value)) = (&body.widget_name, &body.value) else {
        return bad_request("widget_name and value are required");
    };
    if body.node_ids.is_empty() {
        return bad_request("node_ids must not be empty");
    }

    let base = json!({"widget_name": widget_name, "value": value});
    for node in &body.node_ids {
        events.emit("lm_widget_update", target_payload(node, &base));
    }
    success()
}
