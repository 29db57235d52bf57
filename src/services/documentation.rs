use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Tandem Grid relay.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::get_session,
        crate::routes::sessions::create_session,
        crate::routes::sessions::update_session,
        crate::routes::grants::create_grant,
        crate::routes::grants::get_grant,
        crate::routes::grants::answer_grant,
        crate::routes::grants::list_grants,
        crate::routes::presence::heartbeat,
        crate::routes::presence::presence,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::session::UpdateSessionRequest,
            crate::dto::presence::PresenceResponse,
            crate::dto::bus::BusFrame,
            crate::dto::bus::BusClientMessage,
            crate::dto::bus::BusServerMessage,
            crate::dao::models::SessionEntity,
            crate::dao::models::GrantEntity,
            crate::state::session::GameStatus,
            crate::state::grant::GrantStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Shared game session rows"),
        (name = "grants", description = "Post-game reward grants"),
        (name = "presence", description = "Player liveness"),
        (name = "bus", description = "Realtime propagation bus over WebSocket"),
    )
)]
pub struct ApiDoc;
