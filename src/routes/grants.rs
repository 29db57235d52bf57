use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dao::models::GrantEntity, error::AppError, services::grant_service, state::SharedState,
};

/// Grant row endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/grants", post(create_grant))
        .route("/grants/{id}", get(get_grant).put(answer_grant))
        .route("/couples/{couple_id}/grants", get(list_grants))
}

/// Store a newly issued grant.
#[utoipa::path(
    post,
    path = "/grants",
    tag = "grants",
    request_body = GrantEntity,
    responses(
        (status = 201, description = "Grant stored", body = GrantEntity),
        (status = 400, description = "Invalid grant"),
        (status = 409, description = "Grant id already used")
    )
)]
pub async fn create_grant(
    State(state): State<SharedState>,
    Valid(Json(grant)): Valid<Json<GrantEntity>>,
) -> Result<(StatusCode, Json<GrantEntity>), AppError> {
    let created = grant_service::create_grant(&state, grant).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Fetch a grant.
#[utoipa::path(
    get,
    path = "/grants/{id}",
    tag = "grants",
    params(("id" = Uuid, Path, description = "Grant identifier")),
    responses(
        (status = 200, description = "Stored grant", body = GrantEntity),
        (status = 404, description = "Unknown grant")
    )
)]
pub async fn get_grant(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GrantEntity>, AppError> {
    Ok(Json(grant_service::get_grant(&state, id).await?))
}

/// Record the recipient's answer to a pending grant.
#[utoipa::path(
    put,
    path = "/grants/{id}",
    tag = "grants",
    params(("id" = Uuid, Path, description = "Grant identifier")),
    request_body = GrantEntity,
    responses(
        (status = 204, description = "Answer stored"),
        (status = 400, description = "Invalid answer"),
        (status = 404, description = "Unknown grant"),
        (status = 409, description = "Grant was already answered")
    )
)]
pub async fn answer_grant(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(grant)): Valid<Json<GrantEntity>>,
) -> Result<StatusCode, AppError> {
    grant_service::answer_grant(&state, id, grant).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List every grant of a couple, oldest first.
#[utoipa::path(
    get,
    path = "/couples/{couple_id}/grants",
    tag = "grants",
    params(("couple_id" = Uuid, Path, description = "Couple identifier")),
    responses((status = 200, description = "Grants of the couple", body = [GrantEntity]))
)]
pub async fn list_grants(
    State(state): State<SharedState>,
    Path(couple_id): Path<Uuid>,
) -> Result<Json<Vec<GrantEntity>>, AppError> {
    Ok(Json(grant_service::list_grants(&state, couple_id).await?))
}
