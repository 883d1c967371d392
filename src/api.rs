use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::feed::{ConnectionState, FeedClient};
use crate::instruments::InstrumentDirectory;
use crate::sinks::{RecentTickCache, TickBuffer};
use crate::websocket::{self, BroadcastHub, TickMessage};

/// Shared state for the HTTP status surface.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub recent: Arc<RecentTickCache>,
    pub buffer: Arc<TickBuffer>,
    pub feed: Arc<FeedClient>,
    pub directory: Arc<InstrumentDirectory>,
}

/// Builds the full application router: tick WebSocket endpoints plus the
/// HTTP query surface.
pub fn create_router(state: AppState) -> Router {
    let ws_routes = websocket::routes(Arc::clone(&state.hub));
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/api/v1/sessions", get(list_sessions))
        .route("/api/v1/sessions/:session_id", get(get_session))
        .route("/api/v1/ticks/:symbol", get(latest_tick))
        .route("/api/v1/buffer/stats", get(buffer_stats))
        .route("/api/v1/instruments/refresh", post(refresh_instruments))
        .with_state(state);

    ws_routes.merge(api_routes)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    feed_state: String,
    reconnect_attempts: u32,
    tracked_instruments: usize,
    sessions: usize,
    indices: usize,
    stocks: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let feed = state.feed.status();
    let status = match feed.state {
        ConnectionState::Connected => "ok",
        ConnectionState::AuthFailed => "unhealthy",
        _ => "degraded",
    };
    Json(HealthResponse {
        status,
        feed_state: format!("{:?}", feed.state),
        reconnect_attempts: feed.reconnect_attempts,
        tracked_instruments: feed.tracked_instruments,
        sessions: state.hub.session_count(),
        indices: state.directory.index_count(),
        stocks: state.directory.stock_count(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: String,
    endpoint: &'static str,
    subscriptions: Vec<String>,
}

fn session_response(hub: &BroadcastHub, session_id: &str) -> Option<SessionResponse> {
    Some(SessionResponse {
        session_id: session_id.to_string(),
        endpoint: hub.endpoint_of(session_id)?.as_str(),
        subscriptions: hub.subscriptions_of(session_id)?,
    })
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionResponse>> {
    let mut sessions: Vec<SessionResponse> = state
        .hub
        .session_ids()
        .iter()
        .filter_map(|id| session_response(&state.hub, id))
        .collect();
    sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    Json(sessions)
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match session_response(&state.hub, &session_id) {
        Some(session) => Json(session).into_response(),
        None => not_found("session not found"),
    }
}

async fn latest_tick(State(state): State<AppState>, Path(symbol): Path<String>) -> Response {
    match state.recent.latest(&symbol) {
        Some(tick) => Json(TickMessage::from(&tick)).into_response(),
        None => not_found("no tick seen for symbol"),
    }
}

async fn buffer_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.buffer.stats();
    Json(serde_json::json!({
        "buffered": stats.buffered,
        "accepted": stats.accepted,
        "dropped": stats.dropped,
    }))
}

async fn refresh_instruments(State(state): State<AppState>) -> Response {
    match state.directory.refresh().await {
        Ok(()) => {
            info!(
                indices = state.directory.index_count(),
                stocks = state.directory.stock_count(),
                "instrument directory refreshed"
            );
            Json(serde_json::json!({
                "indices": state.directory.index_count(),
                "stocks": state.directory.stock_count(),
            }))
            .into_response()
        }
        Err(err) => {
            error!(error = %err, "instrument refresh failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "error": true,
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": true,
            "message": message,
        })),
    )
        .into_response()
}
