use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::GrantEntity,
    state::{board::Mark, session::PlayerId},
};

/// Lifecycle of a reward grant. `Pending` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// Waiting for the recipient's answer.
    Pending,
    /// Accepted by the recipient.
    Acknowledged,
    /// Declined by the recipient.
    Fulfilled,
}

impl GrantStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, GrantStatus::Pending)
    }
}

/// Answer given by the recipient of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GrantResponse {
    /// Moves the grant to `Acknowledged`.
    Accept,
    /// Moves the grant to `Fulfilled`.
    Decline,
}

impl GrantResponse {
    fn target(self) -> GrantStatus {
        match self {
            GrantResponse::Accept => GrantStatus::Acknowledged,
            GrantResponse::Decline => GrantStatus::Fulfilled,
        }
    }
}

/// Rejected grant response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantTransitionError {
    /// The grant already left `Pending`.
    #[error("grant {id} is already {status:?}")]
    AlreadyAnswered {
        /// Grant identifier.
        id: Uuid,
        /// Terminal status currently held.
        status: GrantStatus,
    },
    /// Someone other than the recipient tried to answer.
    #[error("player {actor} is not the recipient of grant {id}")]
    NotRecipient {
        /// Grant identifier.
        id: Uuid,
        /// Player who attempted the response.
        actor: PlayerId,
    },
}

/// Post-game reward message with a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub id: Uuid,
    pub couple_id: Uuid,
    pub recipient_id: PlayerId,
    pub recipient_name: String,
    pub recipient_symbol: Mark,
    pub request_text: String,
    pub game_session_id: Uuid,
    pub status: GrantStatus,
    pub response_text: Option<String>,
    pub responded_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl Grant {
    /// Build a pending grant for `recipient_id`.
    pub fn pending(
        couple_id: Uuid,
        game_session_id: Uuid,
        recipient_id: PlayerId,
        recipient_name: impl Into<String>,
        recipient_symbol: Mark,
        request_text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            couple_id,
            recipient_id,
            recipient_name: recipient_name.into(),
            recipient_symbol,
            request_text: request_text.into(),
            game_session_id,
            status: GrantStatus::Pending,
            response_text: None,
            responded_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Whether the grant still waits for an answer from `player`.
    pub fn is_pending_for(&self, player: PlayerId) -> bool {
        self.status == GrantStatus::Pending && self.recipient_id == player
    }

    /// Apply the recipient's answer, producing the terminal grant.
    pub fn respond(
        &self,
        actor: PlayerId,
        response: GrantResponse,
        response_text: Option<String>,
    ) -> Result<Grant, GrantTransitionError> {
        if self.recipient_id != actor {
            return Err(GrantTransitionError::NotRecipient { id: self.id, actor });
        }
        if self.status.is_terminal() {
            return Err(GrantTransitionError::AlreadyAnswered {
                id: self.id,
                status: self.status,
            });
        }

        Ok(Grant {
            status: response.target(),
            response_text,
            responded_at: Some(OffsetDateTime::now_utc()),
            ..self.clone()
        })
    }
}

impl From<GrantEntity> for Grant {
    fn from(value: GrantEntity) -> Self {
        Self {
            id: value.id,
            couple_id: value.couple_id,
            recipient_id: value.winner_user_id,
            recipient_name: value.winner_name,
            recipient_symbol: value.winner_symbol,
            request_text: value.request_text,
            game_session_id: value.game_session_id,
            status: value.status,
            response_text: value.response_text,
            responded_at: value.responded_at,
            created_at: value.created_at,
        }
    }
}

impl From<Grant> for GrantEntity {
    fn from(value: Grant) -> Self {
        Self {
            id: value.id,
            couple_id: value.couple_id,
            winner_user_id: value.recipient_id,
            winner_name: value.recipient_name,
            winner_symbol: value.recipient_symbol,
            request_text: value.request_text,
            game_session_id: value.game_session_id,
            status: value.status,
            response_text: value.response_text,
            responded_at: value.responded_at,
            created_at: value.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant_for(recipient: PlayerId) -> Grant {
        Grant::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            recipient,
            "Sam",
            Mark::B,
            "Breakfast in bed",
        )
    }

    #[test]
    fn accept_acknowledges_and_decline_fulfils() {
        let recipient = Uuid::new_v4();
        let grant = grant_for(recipient);

        let accepted = grant
            .respond(recipient, GrantResponse::Accept, Some("deal".into()))
            .unwrap();
        assert_eq!(accepted.status, GrantStatus::Acknowledged);
        assert_eq!(accepted.response_text.as_deref(), Some("deal"));
        assert!(accepted.responded_at.is_some());

        let declined = grant.respond(recipient, GrantResponse::Decline, None).unwrap();
        assert_eq!(declined.status, GrantStatus::Fulfilled);
    }

    #[test]
    fn terminal_grant_never_reverts() {
        let recipient = Uuid::new_v4();
        let answered = grant_for(recipient)
            .respond(recipient, GrantResponse::Accept, None)
            .unwrap();

        let err = answered
            .respond(recipient, GrantResponse::Decline, None)
            .unwrap_err();
        assert!(matches!(
            err,
            GrantTransitionError::AlreadyAnswered {
                status: GrantStatus::Acknowledged,
                ..
            }
        ));
    }

    #[test]
    fn only_recipient_may_respond() {
        let grant = grant_for(Uuid::new_v4());
        let intruder = Uuid::new_v4();
        assert_eq!(
            grant.respond(intruder, GrantResponse::Accept, None),
            Err(GrantTransitionError::NotRecipient {
                id: grant.id,
                actor: intruder
            })
        );
    }

    #[test]
    fn entity_uses_persisted_field_names() {
        let grant = grant_for(Uuid::new_v4());
        let value = serde_json::to_value(GrantEntity::from(grant.clone())).unwrap();
        assert_eq!(value["winnerUserId"], serde_json::json!(grant.recipient_id));
        assert_eq!(value["winnerSymbol"], "B");
        assert_eq!(value["status"], "pending");
        assert!(value["respondedAt"].is_null());
    }
}
