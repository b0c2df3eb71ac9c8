//! Real-time WebSocket API for session chat.
//!
//! - `/ws/chat?session_id=..&participant_id=..` - chat WebSocket endpoint
//! - `/api/realtime/stats` - statistics about real-time connections
//!
//! Participant identity is authenticated upstream; the query parameters are
//! trusted as given.

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{future, SinkExt, StreamExt};
use loveguru_realtime::{Frame, HubManager, MetricsSnapshot, OriginPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::AppState;

/// Create the real-time API routes.
pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/chat", get(ws_handler))
        .route("/api/realtime/stats", get(get_stats))
}

/// Query parameters of the chat endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ChatParams {
    pub session_id: Option<String>,
    pub participant_id: Option<String>,
}

impl ChatParams {
    /// Both identifiers, when present and non-empty.
    fn identity(&self) -> Option<(&str, &str)> {
        let session = self.session_id.as_deref().filter(|s| !s.is_empty())?;
        let participant = self.participant_id.as_deref().filter(|p| !p.is_empty())?;
        Some((session, participant))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Origin header of a request; unreadable values are kept as empty strings
/// so that they fail every explicit origin match.
fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ORIGIN)
        .map(|value| value.to_str().unwrap_or_default())
}

fn origin_allowed(policy: &OriginPolicy, headers: &HeaderMap) -> bool {
    policy.is_allowed(request_origin(headers))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ChatParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(Query(params)) = params else {
        return error_response(StatusCode::BAD_REQUEST, "invalid query string");
    };
    let Some((session_id, participant_id)) = params.identity() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "session_id and participant_id are required",
        );
    };

    if !origin_allowed(&state.origins, &headers) {
        warn!(
            origin = request_origin(&headers).unwrap_or_default(),
            session_id = %session_id,
            "WebSocket origin rejected"
        );
        return error_response(StatusCode::FORBIDDEN, "origin not allowed");
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let session_id = session_id.to_string();
    let participant_id = participant_id.to_string();
    let hubs = state.hubs.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hubs, session_id, participant_id))
}

/// Handle a WebSocket connection.
async fn handle_socket(
    mut socket: WebSocket,
    hubs: Arc<HubManager>,
    session_id: String,
    participant_id: String,
) {
    let connection = match hubs.connect(&session_id, &participant_id).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(
                session_id = %session_id,
                participant_id = %participant_id,
                error = %e,
                "Failed to register WebSocket client"
            );
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let client_id = connection.client().id.clone();
    info!(
        client_id = %client_id,
        session_id = %session_id,
        participant_id = %participant_id,
        "WebSocket client connected"
    );

    // Split the WebSocket and adapt both halves to transport frames
    let (ws_sender, ws_receiver) = socket.split();
    let sink =
        ws_sender.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = ws_receiver.filter_map(|message| future::ready(from_message(message)));

    connection.run(sink, stream).await;

    info!(client_id = %client_id, "WebSocket client disconnected");
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping => Message::Ping(Default::default()),
        Frame::Pong => Message::Pong(Default::default()),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Result<Message, axum::Error>) -> Option<Result<Frame, axum::Error>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(_)) => {
            debug!("Binary message ignored");
            None
        }
        Ok(Message::Ping(_)) => Some(Ok(Frame::Ping)),
        Ok(Message::Pong(_)) => Some(Ok(Frame::Pong)),
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Err(e) => Some(Err(e)),
    }
}

/// Statistics response.
#[derive(Serialize)]
struct StatsResponse {
    shards: usize,
    sessions: usize,
    connections: usize,
    metrics: MetricsSnapshot,
    shard_metrics: Vec<MetricsSnapshot>,
}

/// Get real-time connection statistics.
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.hubs.stats().await;
    Json(StatsResponse {
        shards: state.hubs.shard_count(),
        sessions: stats.sessions,
        connections: stats.connections,
        metrics: state.hubs.metrics(),
        shard_metrics: state.hubs.shard_metrics(),
    })
}
