//! Session bootstrap: create the shared row or adopt the one the partner
//! created first. The store's uniqueness constraint is the only arbiter.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    dto::validation::validate_session_key,
    state::session::{GameSession, InvariantViolation, PlayerId, Seats},
};

/// Reasons a match could not be initialized.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to initialize game")]
    Unavailable(#[source] StorageError),
    #[error("invalid session key `{0}`")]
    InvalidKey(String),
    #[error("stored session is invalid")]
    Invalid(#[from] InvariantViolation),
    #[error("player {player} is not seated in session `{key}`")]
    NotSeated { key: String, player: PlayerId },
    #[error("session `{key}` was reported as existing but cannot be read")]
    Vanished { key: String },
}

/// Read the row for `key`, creating it with `self_id` in seat A (and opening)
/// when absent. Losing the creation race adopts the winner's row verbatim.
pub async fn bootstrap(
    store: &dyn SessionStore,
    key: &str,
    self_id: PlayerId,
    partner_id: PlayerId,
) -> Result<GameSession, BootstrapError> {
    validate_session_key(key).map_err(|_| BootstrapError::InvalidKey(key.to_string()))?;

    match store.find_session(key.to_string()).await {
        Ok(Some(row)) => {
            debug!(session_id = key, "adopting existing session");
            return adopt(key, self_id, row.try_into()?);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(session_id = key, error = %err, "session read failed; attempting creation");
        }
    }

    let fresh = GameSession::new(
        key,
        Seats {
            a: self_id,
            b: partner_id,
        },
        self_id,
    );
    fresh.check_invariants()?;

    match store.insert_session(fresh.clone().into()).await {
        Ok(()) => {
            info!(session_id = key, "created new game session");
            Ok(fresh)
        }
        Err(StorageError::UniqueViolation { .. }) => {
            debug!(session_id = key, "lost creation race; re-reading session");
            reread(store, key, self_id).await
        }
        Err(err) => Err(BootstrapError::Unavailable(err)),
    }
}

async fn reread(
    store: &dyn SessionStore,
    key: &str,
    self_id: PlayerId,
) -> Result<GameSession, BootstrapError> {
    let row: StorageResult<_> = store.find_session(key.to_string()).await;
    match row {
        Ok(Some(row)) => adopt(key, self_id, row.try_into()?),
        Ok(None) => Err(BootstrapError::Vanished {
            key: key.to_string(),
        }),
        Err(err) => Err(BootstrapError::Unavailable(err)),
    }
}

fn adopt(key: &str, self_id: PlayerId, session: GameSession) -> Result<GameSession, BootstrapError> {
    if !session.seats.contains(self_id) {
        return Err(BootstrapError::NotSeated {
            key: key.to_string(),
            player: self_id,
        });
    }
    Ok(session)
}
