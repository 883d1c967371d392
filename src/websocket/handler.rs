use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::Uri,
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::select;
use tracing::{info, warn};

use super::hub::{BroadcastHub, Endpoint};
use super::messages::{ErrorReply, SubscriptionAction, SubscriptionReply, SubscriptionRequest};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> String {
    format!("session-{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
}

/// Builds the tick WebSocket routes. All four endpoints share one handler;
/// the endpoint is recovered from the request path.
pub fn routes(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/ws/indices", get(websocket_handler))
        .route("/ws/indices/all", get(websocket_handler))
        .route("/ws/stocks", get(websocket_handler))
        .route("/ws/stocks/all", get(websocket_handler))
        .with_state(hub)
}

/// Handles the WebSocket upgrade for a tick endpoint.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(hub): State<Arc<BroadcastHub>>,
) -> Response {
    // Routing constrains the path to the four known endpoints.
    let endpoint = Endpoint::from_path(uri.path()).unwrap_or(Endpoint::StocksAll);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, endpoint))
}

async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>, endpoint: Endpoint) {
    let session_id = next_session_id();
    let mut outbound = hub.register(&session_id, endpoint);
    let (mut sender, mut receiver) = socket.split();

    info!(session_id, endpoint = endpoint.as_str(), "tick client connected");

    loop {
        select! {
            // Ticks queued for this session by the broadcast hub.
            payload = outbound.recv() => {
                match payload {
                    Some(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Control messages from the client.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_control_message(&hub, &session_id, &text);
                        if sender.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(session_id, error = %err, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    hub.unregister(&session_id);
    info!(session_id, "tick client disconnected");
}

/// Applies one subscription control message and returns the JSON reply.
/// Invalid requests are answered with an error and change no state.
fn handle_control_message(hub: &BroadcastHub, session_id: &str, text: &str) -> String {
    let request: SubscriptionRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            return error_reply(format!("invalid subscription request: {err}"));
        }
    };

    if let Err(message) = request.validate() {
        return error_reply(message);
    }

    let result = match request.action {
        SubscriptionAction::Subscribe => hub.subscribe(session_id, &request.symbols),
        SubscriptionAction::Unsubscribe => hub.unsubscribe(session_id, &request.symbols),
    };

    match result {
        Some(symbols) => {
            let reply = SubscriptionReply {
                action: request.action,
                asset_class: request.asset_class,
                symbols,
            };
            serde_json::to_string(&reply)
                .unwrap_or_else(|_| error_reply("internal serialization error".to_string()))
        }
        None => error_reply("session is not registered".to_string()),
    }
}

fn error_reply(message: String) -> String {
    serde_json::to_string(&ErrorReply::new(message))
        .unwrap_or_else(|_| r#"{"error":true,"message":"internal error"}"#.to_string())
}
