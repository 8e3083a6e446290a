//! Push-notification channel for locally connected frontends.
//!
//! The whole point of handling widget routes locally instead of proxying them
//! is that their observable effect — a real-time event reaching the browser —
//! must land on *this* host's listeners, not the remote one's. [`EventBus`]
//! is that channel: a broadcast sender that handlers fire into without caring
//! whether anyone is listening, plus the host-side WebSocket endpoint
//! (`GET /ws`) that connected frontends subscribe through.
//!
//! Delivery is fire-and-forget: no acknowledgement, no buffering for absent
//! listeners, lagging subscribers skip ahead.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::AppState;

/// Fan-out channel for named frontend events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Value>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit a named event with a JSON payload to all connected listeners.
    ///
    /// Fire-and-forget: a send with no active subscribers is not an error.
    pub fn emit(&self, event: &str, payload: Value) {
        let _ = self.tx.send(json!({
            "type": event,
            "data": payload,
        }));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// `GET /ws` — WebSocket upgrade for local event listeners.
pub async fn events_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_listener(socket, state))
}

/// Forward broadcast events to one listener socket until either side closes.
async fn handle_listener(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut events = state.events.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(value) => {
                        let text = serde_json::to_string(&value)
                            .unwrap_or_else(|_| String::from("{}"));
                        if ws_sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Slow listener fell behind the ring — skip ahead.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Listeners only receive; inbound frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
