use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{dto::presence::PresenceResponse, state::SharedState};

/// Presence endpoints backed by the in-memory presence table.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/presence/{player_id}", get(presence))
        .route("/presence/{player_id}/heartbeat", post(heartbeat))
}

/// Announce that a player is alive.
#[utoipa::path(
    post,
    path = "/presence/{player_id}/heartbeat",
    tag = "presence",
    params(("player_id" = Uuid, Path, description = "Player identifier")),
    responses((status = 204, description = "Heartbeat recorded"))
)]
pub async fn heartbeat(State(state): State<SharedState>, Path(player_id): Path<Uuid>) -> StatusCode {
    state.presence().touch(player_id);
    StatusCode::NO_CONTENT
}

/// Whether a player sent a heartbeat recently.
#[utoipa::path(
    get,
    path = "/presence/{player_id}",
    tag = "presence",
    params(("player_id" = Uuid, Path, description = "Player identifier")),
    responses((status = 200, description = "Liveness of the player", body = PresenceResponse))
)]
pub async fn presence(
    State(state): State<SharedState>,
    Path(player_id): Path<Uuid>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        player_id,
        online: state.presence().online(player_id),
    })
}
