//! Grant issuance for finished games and the relay-side grant row operations.

use tracing::info;
use uuid::Uuid;

use crate::{
    config::GrantTexts,
    dao::models::GrantEntity,
    error::ServiceError,
    state::{
        SharedState,
        board::Mark,
        grant::Grant,
        session::{GameOutcome, GameSession, Participant},
    },
};

/// Build the pending grants owed for a finished session: the winner and the
/// loser each get one on a win, both players get one on a draw.
///
/// Abandoned and running sessions produce nothing.
pub fn grants_for_outcome(
    session: &GameSession,
    couple_id: Uuid,
    participants: [&Participant; 2],
    texts: &GrantTexts,
) -> Vec<Grant> {
    let Some(outcome) = session.outcome() else {
        return Vec::new();
    };

    participants
        .into_iter()
        .filter_map(|participant| {
            let symbol = session.seats.mark_of(participant.id)?;
            let text = match outcome {
                GameOutcome::Won { winner } if winner == participant.id => &texts.winner,
                GameOutcome::Won { .. } => &texts.loser,
                GameOutcome::Draw => &texts.draw,
            };
            Some(grant_for(session, couple_id, participant, symbol, text))
        })
        .collect()
}

fn grant_for(
    session: &GameSession,
    couple_id: Uuid,
    recipient: &Participant,
    symbol: Mark,
    text: &str,
) -> Grant {
    Grant::pending(
        couple_id,
        session.id,
        recipient.id,
        recipient.name.clone(),
        symbol,
        text,
    )
}

/// Store a freshly issued grant.
pub async fn create_grant(
    state: &SharedState,
    grant: GrantEntity,
) -> Result<GrantEntity, ServiceError> {
    if grant.status.is_terminal() {
        return Err(ServiceError::InvalidInput(
            "grants are issued pending".into(),
        ));
    }

    let store = state.require_session_store().await?;
    store.insert_grant(grant.clone()).await?;
    info!(grant_id = %grant.id, couple_id = %grant.couple_id, "grant row created");
    Ok(grant)
}

/// Return a single grant row.
pub async fn get_grant(state: &SharedState, id: Uuid) -> Result<GrantEntity, ServiceError> {
    let store = state.require_session_store().await?;
    store
        .find_grant(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("grant `{id}` not found")))
}

/// Record the recipient's answer. Only the answer fields may change and the
/// stored grant must still be pending.
pub async fn answer_grant(
    state: &SharedState,
    id: Uuid,
    answered: GrantEntity,
) -> Result<(), ServiceError> {
    if answered.id != id {
        return Err(ServiceError::InvalidInput(format!(
            "body targets grant `{}` but path names `{id}`",
            answered.id
        )));
    }
    if !answered.status.is_terminal() {
        return Err(ServiceError::InvalidInput(
            "an answer must move the grant out of pending".into(),
        ));
    }

    let store = state.require_session_store().await?;
    let stored = store
        .find_grant(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("grant `{id}` not found")))?;

    let expected = GrantEntity {
        status: answered.status,
        response_text: answered.response_text.clone(),
        responded_at: answered.responded_at,
        ..stored
    };
    if expected != answered {
        return Err(ServiceError::InvalidInput(
            "only status, responseText and respondedAt may change".into(),
        ));
    }

    store.update_grant(answered).await?;
    info!(grant_id = %id, "grant answered");
    Ok(())
}

/// Every grant of a couple, oldest first.
pub async fn list_grants(
    state: &SharedState,
    couple_id: Uuid,
) -> Result<Vec<GrantEntity>, ServiceError> {
    let store = state.require_session_store().await?;
    Ok(store.list_grants(couple_id).await?)
}
