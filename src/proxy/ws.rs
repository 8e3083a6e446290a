//! WebSocket tunnel — bridges an inbound socket to the remote instance.
//!
//! The inbound connection is upgraded locally, a second independent
//! WebSocket is opened to the remote (scheme translated http→ws,
//! https→wss), and two relay loops forward text and binary frames verbatim.
//! First-completed-cancels-the-other: as soon as either direction ends —
//! close frame, transport error, anything — the other loop is dropped and
//! both sides are closed. No reconnection, no buffering, no timeout; a
//! bridge lives exactly as long as both links do.

use axum::{
    extract::{
        ws::{Message as LocalMessage, WebSocket},
        FromRequestParts, Request, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as RemoteMessage;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade the inbound request and spawn the bridge.
///
/// Invoked from the dispatch middleware, so the upgrade headers are pulled
/// out of the raw request rather than an extractor argument.
pub async fn bridge_upgrade(state: AppState, req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let mut target = format!(
        "{}{}",
        translate_scheme(&state.config.remote.url),
        parts.uri.path()
    );
    if let Some(query) = parts.uri.query() {
        target.push('?');
        target.push_str(query);
    }

    upgrade.on_upgrade(move |socket| bridge(socket, target))
}

/// http→ws / https→wss; anything else passes through untouched.
fn translate_scheme(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

/// Run both relay directions until either ends, then tear everything down.
async fn bridge(mut local: WebSocket, target: String) {
    let remote = match connect_async(&target).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(url = %target, error = %e, "WebSocket bridge connect failed");
            // Upgrade already happened; all we can do is close the local side.
            let _ = local.close().await;
            return;
        }
    };

    debug!(url = %target, "WebSocket bridge established");

    let (mut remote_sink, mut remote_stream) = remote.split();
    let (mut local_sink, mut local_stream) = local.split();

    let local_to_remote = async {
        while let Some(msg) = local_stream.next().await {
            let forwarded = match msg {
                Ok(LocalMessage::Text(text)) => RemoteMessage::text(text.as_str()),
                Ok(LocalMessage::Binary(bytes)) => RemoteMessage::binary(bytes),
                Ok(LocalMessage::Close(_)) | Err(_) => break,
                // Ping/pong is answered by the transport on each leg.
                Ok(_) => continue,
            };
            if remote_sink.send(forwarded).await.is_err() {
                return;
            }
        }
        let _ = remote_sink.send(RemoteMessage::Close(None)).await;
    };

    let remote_to_local = async {
        while let Some(msg) = remote_stream.next().await {
            let forwarded = match msg {
                Ok(RemoteMessage::Text(text)) => LocalMessage::Text(text.as_str().into()),
                Ok(RemoteMessage::Binary(bytes)) => LocalMessage::Binary(bytes),
                Ok(RemoteMessage::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            if local_sink.send(forwarded).await.is_err() {
                return;
            }
        }
        let _ = local_sink.send(LocalMessage::Close(None)).await;
    };

    // First side to finish cancels the other; dropping the halves closes
    // whatever the close frames above didn't.
    tokio::select! {
        () = local_to_remote => debug!(url = %target, "WebSocket bridge: local side closed"),
        () = remote_to_local => debug!(url = %target, "WebSocket bridge: remote side closed"),
    }
}
