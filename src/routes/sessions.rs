use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dao::models::SessionEntity,
    dto::session::UpdateSessionRequest,
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Session row endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route(
            "/sessions/{session_id}",
            get(get_session).put(update_session),
        )
}

/// Fetch the row of a session.
#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "External session key")),
    responses(
        (status = 200, description = "Stored row", body = SessionEntity),
        (status = 404, description = "No row for this key"),
        (status = 503, description = "Relay is degraded")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionEntity>, AppError> {
    Ok(Json(
        session_service::get_session(&state, &session_id).await?,
    ))
}

/// Create the row of a session; the first writer wins.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = SessionEntity,
    responses(
        (status = 201, description = "Row created", body = SessionEntity),
        (status = 400, description = "Invalid row"),
        (status = 409, description = "A row already exists for this key")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(session)): Valid<Json<SessionEntity>>,
) -> Result<(StatusCode, Json<SessionEntity>), AppError> {
    let created = session_service::create_session(&state, session).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Replace the row of a session if it still holds the expected move count.
#[utoipa::path(
    put,
    path = "/sessions/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "External session key")),
    request_body = UpdateSessionRequest,
    responses(
        (status = 204, description = "Row replaced"),
        (status = 400, description = "Invalid row"),
        (status = 404, description = "No row for this key"),
        (status = 409, description = "Row changed since it was read")
    )
)]
pub async fn update_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Valid(Json(request)): Valid<Json<UpdateSessionRequest>>,
) -> Result<StatusCode, AppError> {
    session_service::update_session(&state, &session_id, request).await?;
    Ok(StatusCode::NO_CONTENT)
}
