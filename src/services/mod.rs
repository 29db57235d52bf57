/// Session bootstrap: create-or-adopt the row for a session key.
pub mod bootstrap;
/// OpenAPI documentation generation.
pub mod documentation;
/// Grant issuance, lookup and answers.
pub mod grant_service;
/// Health check service.
pub mod health_service;
/// Move validation and session transitions.
pub mod move_service;
/// Partner presence and offline notifications.
pub mod presence;
/// Session row reads and conditional writes.
pub mod session_service;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
/// Bus WebSocket connection and message handling.
pub mod websocket_service;
