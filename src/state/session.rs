use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::SessionEntity,
    state::board::{Board, Mark, check_winner},
};

/// Identifier of a participant (a user of the surrounding product).
pub type PlayerId = Uuid;

/// A player together with the display name shown to their partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
}

impl Participant {
    /// Build a participant.
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Result of a finished game that produces grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    /// One player completed a line.
    Won {
        /// The player who completed the line.
        winner: PlayerId,
    },
    /// Full board without a line.
    Draw,
}

/// Lifecycle status of a shared game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Moves are still accepted.
    Playing,
    /// A player completed a line.
    Won,
    /// The board filled up without a line.
    Draw,
    /// A player left the game before it finished.
    Abandoned,
}

impl GameStatus {
    /// Whether the game no longer accepts moves.
    pub fn is_terminal(self) -> bool {
        !matches!(self, GameStatus::Playing)
    }
}

/// The two players of a session and the mark each one plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seats {
    /// Player holding mark `A`; the creator of the row.
    pub a: PlayerId,
    /// Player holding mark `B`.
    pub b: PlayerId,
}

impl Seats {
    /// Mark played by `player`, if seated.
    pub fn mark_of(&self, player: PlayerId) -> Option<Mark> {
        if player == self.a {
            Some(Mark::A)
        } else if player == self.b {
            Some(Mark::B)
        } else {
            None
        }
    }

    /// Player holding `mark`.
    pub fn player_with(&self, mark: Mark) -> Option<PlayerId> {
        match mark {
            Mark::A => Some(self.a),
            Mark::B => Some(self.b),
            Mark::Empty => None,
        }
    }

    /// The seated opponent of `player`.
    pub fn other(&self, player: PlayerId) -> Option<PlayerId> {
        self.mark_of(player)
            .and_then(|mark| self.player_with(mark.opponent()))
    }

    /// Whether `player` holds one of the two seats.
    pub fn contains(&self, player: PlayerId) -> bool {
        self.mark_of(player).is_some()
    }
}

/// Row-level invariant broken by a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// `won` status without a winner.
    #[error("session is marked won but has no winner")]
    WonWithoutWinner,
    /// Winner set on a session that is not `won`.
    #[error("session has a winner but is not marked won")]
    WinnerWithoutWin,
    /// The recorded move count disagrees with the board.
    #[error("move count {recorded} does not match {filled} filled cells")]
    MoveCountMismatch {
        /// Value stored in the row.
        recorded: u32,
        /// Marks actually present on the board.
        filled: usize,
    },
    /// Both seats reference the same player.
    #[error("seats must reference two distinct players")]
    DuplicateSeat,
    /// A player id that does not hold a seat.
    #[error("player {0} is not seated in this session")]
    UnseatedPlayer(PlayerId),
}

/// Durable truth for one match instance, as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    /// Primary key of the row.
    pub id: Uuid,
    /// External correlation key.
    pub session_id: String,
    /// Seat assignment.
    pub seats: Seats,
    /// Current grid.
    pub board: Board,
    /// Player expected to move next.
    pub current_player_id: PlayerId,
    /// Lifecycle status.
    pub status: GameStatus,
    /// Winner, set exactly when `status` is `Won`.
    pub winner_id: Option<PlayerId>,
    /// Number of marks on the board.
    pub move_count: u32,
    /// Write counter of the row, bumped by every move, reset and abandon.
    pub revision: u32,
    /// Time of the last committed change.
    pub last_move_at: OffsetDateTime,
}

impl GameSession {
    /// Fresh session with an empty board; `opening_player` moves first.
    pub fn new(session_id: impl Into<String>, seats: Seats, opening_player: PlayerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            seats,
            board: Board::empty(),
            current_player_id: opening_player,
            status: GameStatus::Playing,
            winner_id: None,
            move_count: 0,
            revision: 0,
            last_move_at: OffsetDateTime::now_utc(),
        }
    }

    /// The same row re-initialized for another round.
    pub fn reset(&self, opening_player: PlayerId) -> Self {
        Self {
            board: Board::empty(),
            current_player_id: opening_player,
            status: GameStatus::Playing,
            winner_id: None,
            move_count: 0,
            revision: self.next_revision(),
            last_move_at: OffsetDateTime::now_utc(),
            ..self.clone()
        }
    }

    /// Revision the next write of this row carries.
    pub fn next_revision(&self) -> u32 {
        self.revision.wrapping_add(1)
    }

    /// Whether the game has stopped accepting moves.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Outcome of a finished game, `None` while playing or when abandoned.
    pub fn outcome(&self) -> Option<GameOutcome> {
        match (self.status, self.winner_id) {
            (GameStatus::Won, Some(winner)) => Some(GameOutcome::Won { winner }),
            (GameStatus::Draw, _) => Some(GameOutcome::Draw),
            _ => None,
        }
    }

    /// Check the row invariants of a snapshot.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.seats.a == self.seats.b {
            return Err(InvariantViolation::DuplicateSeat);
        }
        if !self.seats.contains(self.current_player_id) {
            return Err(InvariantViolation::UnseatedPlayer(self.current_player_id));
        }

        match (self.status, self.winner_id) {
            (GameStatus::Won, None) => return Err(InvariantViolation::WonWithoutWinner),
            (GameStatus::Won, Some(winner)) if !self.seats.contains(winner) => {
                return Err(InvariantViolation::UnseatedPlayer(winner));
            }
            (GameStatus::Playing | GameStatus::Draw | GameStatus::Abandoned, Some(_)) => {
                return Err(InvariantViolation::WinnerWithoutWin);
            }
            _ => {}
        }

        let filled = self.board.filled_cells();
        if filled != self.move_count as usize {
            return Err(InvariantViolation::MoveCountMismatch {
                recorded: self.move_count,
                filled,
            });
        }

        Ok(())
    }

    /// Whether the board shows a line that the status does not account for.
    pub fn has_unrecorded_line(&self) -> bool {
        self.status == GameStatus::Playing && check_winner(&self.board).is_some()
    }
}

impl TryFrom<SessionEntity> for GameSession {
    type Error = InvariantViolation;

    fn try_from(value: SessionEntity) -> Result<Self, Self::Error> {
        let session = Self {
            id: value.id,
            session_id: value.session_id,
            seats: Seats {
                a: value.player_a_id,
                b: value.player_b_id,
            },
            board: value.board,
            current_player_id: value.current_player_id,
            status: value.game_status,
            winner_id: value.winner_id,
            move_count: value.moves_count,
            revision: value.revision,
            last_move_at: value.last_move_at,
        };
        session.check_invariants()?;
        Ok(session)
    }
}

impl From<GameSession> for SessionEntity {
    fn from(value: GameSession) -> Self {
        Self {
            id: value.id,
            session_id: value.session_id,
            player_a_id: value.seats.a,
            player_b_id: value.seats.b,
            board: value.board,
            current_player_id: value.current_player_id,
            game_status: value.status,
            winner_id: value.winner_id,
            moves_count: value.move_count,
            revision: value.revision,
            last_move_at: value.last_move_at,
        }
    }
}
