use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::{
    dao::models::{GrantEntity, SessionEntity},
    state::{board::Board, board::Mark, grant::GrantStatus, session::GameStatus},
};

pub const SESSION_COLLECTION_NAME: &str = "game_sessions";
pub const GRANT_COLLECTION_NAME: &str = "love_grants";

/// Session row as stored in MongoDB: ids as strings, board as a nested array.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    #[serde_as(as = "DisplayFromStr")]
    id: Uuid,
    session_id: String,
    #[serde_as(as = "DisplayFromStr")]
    player_a_id: Uuid,
    #[serde_as(as = "DisplayFromStr")]
    player_b_id: Uuid,
    board: Board,
    #[serde_as(as = "DisplayFromStr")]
    current_player_id: Uuid,
    game_status: GameStatus,
    #[serde_as(as = "Option<DisplayFromStr>")]
    winner_id: Option<Uuid>,
    moves_count: i64,
    #[serde(default)]
    revision: i64,
    #[serde(with = "time::serde::rfc3339")]
    last_move_at: OffsetDateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            session_id: value.session_id,
            player_a_id: value.player_a_id,
            player_b_id: value.player_b_id,
            board: value.board,
            current_player_id: value.current_player_id,
            game_status: value.game_status,
            winner_id: value.winner_id,
            moves_count: i64::from(value.moves_count),
            revision: i64::from(value.revision),
            last_move_at: value.last_move_at,
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let counter = |field: &str, raw: i64| {
            u32::try_from(raw).map_err(|_| MongoDaoError::InvalidDocument {
                collection: SESSION_COLLECTION_NAME,
                id: value.id.to_string(),
                reason: format!("negative or oversized {field} {raw}"),
            })
        };
        let moves_count = counter("movesCount", value.moves_count)?;
        let revision = counter("revision", value.revision)?;

        Ok(Self {
            id: value.id,
            session_id: value.session_id,
            player_a_id: value.player_a_id,
            player_b_id: value.player_b_id,
            board: value.board,
            current_player_id: value.current_player_id,
            game_status: value.game_status,
            winner_id: value.winner_id,
            moves_count,
            revision,
            last_move_at: value.last_move_at,
        })
    }
}

/// Grant row as stored in MongoDB.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoGrantDocument {
    #[serde(rename = "_id")]
    #[serde_as(as = "DisplayFromStr")]
    id: Uuid,
    #[serde_as(as = "DisplayFromStr")]
    couple_id: Uuid,
    #[serde_as(as = "DisplayFromStr")]
    winner_user_id: Uuid,
    winner_name: String,
    winner_symbol: Mark,
    request_text: String,
    #[serde_as(as = "DisplayFromStr")]
    game_session_id: Uuid,
    status: GrantStatus,
    response_text: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    responded_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<GrantEntity> for MongoGrantDocument {
    fn from(value: GrantEntity) -> Self {
        Self {
            id: value.id,
            couple_id: value.couple_id,
            winner_user_id: value.winner_user_id,
            winner_name: value.winner_name,
            winner_symbol: value.winner_symbol,
            request_text: value.request_text,
            game_session_id: value.game_session_id,
            status: value.status,
            response_text: value.response_text,
            responded_at: value.responded_at,
            created_at: value.created_at,
        }
    }
}

impl From<MongoGrantDocument> for GrantEntity {
    fn from(value: MongoGrantDocument) -> Self {
        Self {
            id: value.id,
            couple_id: value.couple_id,
            winner_user_id: value.winner_user_id,
            winner_name: value.winner_name,
            winner_symbol: value.winner_symbol,
            request_text: value.request_text,
            game_session_id: value.game_session_id,
            status: value.status,
            response_text: value.response_text,
            responded_at: value.responded_at,
            created_at: value.created_at,
        }
    }
}
