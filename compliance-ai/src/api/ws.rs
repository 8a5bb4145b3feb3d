//! Notification sockets
//!
//! `GET /ws/{relay}?token=<JWT>`. The token is checked after the upgrade so a rejection can
//! be reported as a policy-violation close frame (1008) with a reason. An accepted socket
//! gets the `connection` acknowledgment before anything else, then every notification
//! delivered to its user on that relay.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use compliance_common::auth::authenticate;
use compliance_common::events::Notification;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::services::Relay;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// GET /ws/:relay
pub async fn relay_socket(
    ws: WebSocketUpgrade,
    Path(relay): Path<String>,
    Query(query): Query<SocketQuery>,
    State(state): State<AppState>,
) -> Response {
    let relay: Relay = match relay.parse() {
        Ok(relay) => relay,
        Err(msg) => return ApiError::NotFound(msg).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, relay, query.token, state))
}

async fn handle_socket(mut socket: WebSocket, relay: Relay, token: Option<String>, state: AppState) {
    let claims = match authenticate(&state.db, &state.config.jwt_secret, token.as_deref()).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(relay = relay.as_str(), reason = %e, "Rejected notification socket");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    let user_id = claims.sub;

    let ack = match Notification::connected().to_frame() {
        Ok(ack) => ack,
        Err(e) => {
            warn!(error = %e, "Failed to serialize connection acknowledgment");
            return;
        }
    };
    if socket.send(Message::Text(ack)).await.is_err() {
        return;
    }

    let registry = state.hub.registry(relay).clone();
    let (connection_id, mut frames) = registry.register(&user_id).await;
    info!(relay = relay.as_str(), user_id = %user_id, %connection_id, "Notification socket connected");

    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
    });

    // Clients have nothing to say; read only to notice the close.
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister(&user_id, connection_id).await;
    debug!(relay = relay.as_str(), user_id = %user_id, %connection_id, "Notification socket closed");
}

/// Build notification socket routes
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws/:relay", get(relay_socket))
}
