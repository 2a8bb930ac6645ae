//! WebSocket signaling endpoint
//!
//! One connection per participant per room. Frames are JSON text; the
//! participant identity comes from the `participant` query parameter.
//! The gateway owns all room state, so this layer only pumps frames:
//! inbound text is decoded and dispatched, outbound server messages
//! are drained from the hub subscription into the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use confab_sfu::{ConnectionId, ParticipantId, RoomId};
use confab_signaling::protocol::{ClientMessage, ServerMessage};

use crate::server::AppState;

// Signaling frames are small; anything bigger is a misbehaving client.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub participant: String,
}

pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.participant.is_empty() || room_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "participant and room required").into_response();
    }

    let room_id = RoomId::from(room_id);
    let participant = ParticipantId::from(query.participant);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id, participant))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    room_id: RoomId,
    participant: ParticipantId,
) {
    // Identifies this socket across its lifetime. A reconnect gets a
    // fresh id, so this socket's late cleanup cannot tear down the
    // rejoined session.
    let connection = ConnectionId::generate();
    let mut server_rx = match state
        .gateway
        .join(room_id.clone(), participant.clone(), connection.clone())
        .await
    {
        Ok(rx) => rx,
        Err(e) => {
            warn!(room_id = %room_id, participant = %participant, error = %e, "Join rejected");
            let reply = ServerMessage::Error {
                message: e.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&reply) {
                let _ = socket.send(Message::Text(text.into())).await;
            }
            return;
        }
    };

    info!(room_id = %room_id, participant = %participant, "WebSocket connection established");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound pump: hub subscription -> socket. Ends when the hub
    // drops the sender (unsubscribe) or the socket write fails.
    let outbound = tokio::spawn(async move {
        while let Some(message) = server_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let message: ClientMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(
                            room_id = %room_id,
                            participant = %participant,
                            error = %e,
                            "Dropping malformed frame"
                        );
                        continue;
                    }
                };
                let leaving = matches!(message, ClientMessage::LeaveRoom { .. });
                if let Err(e) = state
                    .gateway
                    .handle_message(&room_id, &participant, message)
                    .await
                {
                    error!(
                        room_id = %room_id,
                        participant = %participant,
                        error = %e,
                        "Fatal relay error; closing connection"
                    );
                    break;
                }
                if leaving {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // ping/pong/binary ignored
        }
    }

    // Explicit leave and socket loss converge here. The gateway keys
    // the cleanup by connection id, so a superseded socket is a no-op.
    state
        .gateway
        .handle_disconnect(&room_id, &participant, &connection)
        .await;
    outbound.abort();
    info!(room_id = %room_id, participant = %participant, "WebSocket connection closed");
}
