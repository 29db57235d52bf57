use serde::{Deserialize, Serialize};
use serde_with::{PickFirst, json::JsonString, serde_as};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::validate_session_key,
    state::{
        board::{Board, Mark},
        grant::GrantStatus,
        session::GameStatus,
    },
};

/// Persisted game session row, also used verbatim as the row-change payload.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntity {
    /// Primary key of the row.
    pub id: Uuid,
    /// External correlation key shared by both clients (unique per store).
    #[validate(custom(function = "validate_session_key"))]
    pub session_id: String,
    /// Player sitting in seat A (plays `A`).
    pub player_a_id: Uuid,
    /// Player sitting in seat B (plays `B`).
    pub player_b_id: Uuid,
    /// 3x3 grid, written as a JSON-encoded string and accepted either encoded
    /// or as a structured array.
    #[serde_as(as = "PickFirst<(JsonString, _)>")]
    #[schema(value_type = String, example = r#"[["A",null,null],[null,null,null],[null,null,null]]"#)]
    pub board: Board,
    /// Player expected to move next.
    pub current_player_id: Uuid,
    /// Lifecycle status of the game.
    pub game_status: GameStatus,
    /// Winner once `game_status` is `won`.
    pub winner_id: Option<Uuid>,
    /// Number of marks on the board.
    #[validate(range(max = 9))]
    pub moves_count: u32,
    /// Incremented by every write to the row; conditional updates compare it.
    #[serde(default)]
    pub revision: u32,
    /// Time of the last committed move (or creation/reset).
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub last_move_at: OffsetDateTime,
}

/// Persisted reward grant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GrantEntity {
    /// Primary key of the grant.
    pub id: Uuid,
    /// Couple the grant belongs to.
    pub couple_id: Uuid,
    /// Recipient of the grant.
    pub winner_user_id: Uuid,
    /// Display name of the recipient.
    #[validate(length(min = 1, max = 80))]
    pub winner_name: String,
    /// Mark the recipient played.
    #[schema(value_type = String, example = "A")]
    pub winner_symbol: Mark,
    /// Text presented to the recipient.
    #[validate(length(min = 1, max = 280))]
    pub request_text: String,
    /// Row id of the game session that produced the grant.
    pub game_session_id: Uuid,
    /// Lifecycle status.
    pub status: GrantStatus,
    /// Optional note left by the recipient when responding.
    #[validate(length(max = 500))]
    pub response_text: Option<String>,
    /// Time of the response.
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub responded_at: Option<OffsetDateTime>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
}
