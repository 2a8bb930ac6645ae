//! HTTP router and room inspection endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;

use confab_sfu::RoomId;
use confab_signaling::Gateway;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/{room_id}/participants", get(room_participants))
        .route("/ws/room/{room_id}", get(crate::ws::websocket_handler))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_rooms(State(state): State<AppState>) -> Json<serde_json::Value> {
    let rooms = state.gateway.registry().room_ids();
    Json(json!({ "rooms": rooms }))
}

async fn room_participants(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Response {
    let room_id = RoomId::from(room_id);
    match state.gateway.registry().roster(&room_id).await {
        Ok(participants) => Json(json!({ "participants": participants })).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}
