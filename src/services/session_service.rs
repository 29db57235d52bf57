//! Relay-side session row operations. The relay stores rows and enforces the
//! store constraints; it never evaluates moves.

use tracing::{debug, info};

use crate::{
    dao::models::SessionEntity,
    dto::{session::UpdateSessionRequest, validation::validate_session_key},
    error::ServiceError,
    state::{SharedState, session::GameSession},
};

/// Return the row stored for `session_id`.
pub async fn get_session(
    state: &SharedState,
    session_id: &str,
) -> Result<SessionEntity, ServiceError> {
    validate_session_key(session_id)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let store = state.require_session_store().await?;
    store
        .find_session(session_id.to_string())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
}

/// Insert a fresh row; a second row for the same key is a conflict.
pub async fn create_session(
    state: &SharedState,
    session: SessionEntity,
) -> Result<SessionEntity, ServiceError> {
    check_row(&session)?;

    let store = state.require_session_store().await?;
    store.insert_session(session.clone()).await?;
    info!(session_id = %session.session_id, "session row created");
    Ok(session)
}

/// Replace a row, provided the stored one is still at `expected_revision`.
pub async fn update_session(
    state: &SharedState,
    session_id: &str,
    request: UpdateSessionRequest,
) -> Result<(), ServiceError> {
    let UpdateSessionRequest {
        session,
        expected_revision,
    } = request;

    if session.session_id != session_id {
        return Err(ServiceError::InvalidInput(format!(
            "body targets session `{}` but path names `{session_id}`",
            session.session_id
        )));
    }
    check_row(&session)?;

    let store = state.require_session_store().await?;
    store.update_session(session, expected_revision).await?;
    debug!(session_id, expected_revision, "session row replaced");
    Ok(())
}

/// Refuse rows that break the row invariants or show a line while still playing.
fn check_row(session: &SessionEntity) -> Result<(), ServiceError> {
    let session = GameSession::try_from(session.clone())?;
    if session.has_unrecorded_line() {
        return Err(ServiceError::InvalidInput(format!(
            "session `{}` shows a completed line but is still playing",
            session.session_id
        )));
    }
    Ok(())
}
