//! Move validation and terminal-state computation. Pure functions over
//! [`GameSession`] snapshots; persistence is the caller's concern.

use thiserror::Error;
use time::OffsetDateTime;

use crate::state::{
    board::{OutOfBounds, Position, check_winner},
    session::{GameSession, GameStatus, PlayerId},
};

/// Reasons a move (or reset/abandon) is rejected. Always recoverable locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("the game is over")]
    GameEnded,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("that cell is already taken")]
    CellOccupied,
    #[error("a move is already being saved")]
    MoveInProgress,
    #[error("player {0} is not part of this game")]
    NotSeated(PlayerId),
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBounds),
}

/// Validate a move at `(row, col)` and compute the resulting snapshot.
pub fn submit_move(
    session: &GameSession,
    row: usize,
    col: usize,
    actor: PlayerId,
) -> Result<GameSession, MoveError> {
    apply_move(session, Position::new(row, col)?, actor)
}

/// Validate a move and compute the resulting snapshot.
///
/// Checks run in order: game still playing, actor's turn, cell free. The turn
/// does not advance past a terminal move.
pub fn apply_move(
    session: &GameSession,
    position: Position,
    actor: PlayerId,
) -> Result<GameSession, MoveError> {
    if session.status != GameStatus::Playing {
        return Err(MoveError::GameEnded);
    }
    if session.current_player_id != actor {
        return Err(MoveError::NotYourTurn);
    }
    if !session.board.get(position).is_empty() {
        return Err(MoveError::CellOccupied);
    }

    let mark = session
        .seats
        .mark_of(actor)
        .ok_or(MoveError::NotSeated(actor))?;
    let board = session.board.with_mark(position, mark);

    let (status, winner_id) = match check_winner(&board) {
        Some(winning) => (GameStatus::Won, session.seats.player_with(winning)),
        None if board.is_full() => (GameStatus::Draw, None),
        None => (GameStatus::Playing, None),
    };

    let current_player_id = match status {
        GameStatus::Playing => session
            .seats
            .other(actor)
            .ok_or(MoveError::NotSeated(actor))?,
        _ => session.current_player_id,
    };

    Ok(GameSession {
        board,
        current_player_id,
        status,
        winner_id,
        move_count: session.move_count + 1,
        revision: session.next_revision(),
        last_move_at: OffsetDateTime::now_utc(),
        ..session.clone()
    })
}

/// Re-initialize the board of the same row; `actor` opens the next round.
pub fn reset_session(session: &GameSession, actor: PlayerId) -> Result<GameSession, MoveError> {
    if !session.seats.contains(actor) {
        return Err(MoveError::NotSeated(actor));
    }
    Ok(session.reset(actor))
}

/// Leave a running game: no winner, no grants.
pub fn abandon_session(session: &GameSession, actor: PlayerId) -> Result<GameSession, MoveError> {
    if session.status != GameStatus::Playing {
        return Err(MoveError::GameEnded);
    }
    if !session.seats.contains(actor) {
        return Err(MoveError::NotSeated(actor));
    }

    Ok(GameSession {
        status: GameStatus::Abandoned,
        winner_id: None,
        revision: session.next_revision(),
        last_move_at: OffsetDateTime::now_utc(),
        ..session.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        board::{Board, Mark},
        session::Seats,
    };
    use uuid::Uuid;

    const A: Mark = Mark::A;
    const B: Mark = Mark::B;
    const E: Mark = Mark::Empty;

    fn session_with(board: Board, current_is_a: bool) -> (GameSession, Seats) {
        let seats = Seats {
            a: Uuid::new_v4(),
            b: Uuid::new_v4(),
        };
        let current = if current_is_a { seats.a } else { seats.b };
        let mut session = GameSession::new("couple-1", seats, current);
        session.move_count = board.filled_cells() as u32;
        session.board = board;
        (session, seats)
    }

    #[test]
    fn completing_a_row_wins_without_advancing_turn() {
        let (session, seats) =
            session_with(Board::from_rows([[A, A, E], [B, B, E], [E, E, E]]), true);

        let next = submit_move(&session, 0, 2, seats.a).unwrap();
        assert_eq!(next.status, GameStatus::Won);
        assert_eq!(next.winner_id, Some(seats.a));
        assert_eq!(next.current_player_id, seats.a);
        assert_eq!(next.move_count, 5);
        assert_eq!(next.check_invariants(), Ok(()));
    }

    #[test]
    fn filling_the_board_without_line_is_a_draw() {
        let (session, seats) =
            session_with(Board::from_rows([[A, B, A], [A, B, B], [B, A, E]]), true);

        let next = submit_move(&session, 2, 2, seats.a).unwrap();
        assert_eq!(next.status, GameStatus::Draw);
        assert_eq!(next.winner_id, None);
        assert_eq!(next.current_player_id, seats.a);
    }

    #[test]
    fn regular_move_hands_turn_to_partner() {
        let (session, seats) = session_with(Board::empty(), true);
        let next = submit_move(&session, 1, 1, seats.a).unwrap();
        assert_eq!(next.status, GameStatus::Playing);
        assert_eq!(next.current_player_id, seats.b);
        assert_eq!(next.board.get(Position::new(1, 1).unwrap()), A);
    }

    #[test]
    fn playing_out_of_turn_is_rejected() {
        let (session, seats) = session_with(Board::empty(), false);
        assert_eq!(
            submit_move(&session, 1, 1, seats.a),
            Err(MoveError::NotYourTurn)
        );
    }

    #[test]
    fn checks_run_in_documented_order() {
        let (mut session, seats) =
            session_with(Board::from_rows([[A, E, E], [E, E, E], [E, E, E]]), false);

        // Occupied cell, wrong player: turn check comes first.
        assert_eq!(
            submit_move(&session, 0, 0, seats.a),
            Err(MoveError::NotYourTurn)
        );
        assert_eq!(
            submit_move(&session, 0, 0, seats.b),
            Err(MoveError::CellOccupied)
        );

        session.status = GameStatus::Abandoned;
        assert_eq!(
            submit_move(&session, 1, 1, seats.b),
            Err(MoveError::GameEnded)
        );
    }

    #[test]
    fn out_of_range_cell_is_rejected() {
        let (session, seats) = session_with(Board::empty(), true);
        assert!(matches!(
            submit_move(&session, 3, 0, seats.a),
            Err(MoveError::OutOfBounds(_))
        ));
    }

    #[test]
    fn reset_lets_the_resetting_player_open() {
        let (session, seats) =
            session_with(Board::from_rows([[A, A, A], [B, B, E], [E, E, E]]), true);
        let reset = reset_session(&session, seats.b).unwrap();
        assert_eq!(reset.board, Board::empty());
        assert_eq!(reset.current_player_id, seats.b);
        assert_eq!(reset.status, GameStatus::Playing);

        let stranger = Uuid::new_v4();
        assert_eq!(
            reset_session(&session, stranger),
            Err(MoveError::NotSeated(stranger))
        );
    }

    #[test]
    fn abandon_only_applies_to_running_games() {
        let (session, seats) = session_with(Board::empty(), true);
        let abandoned = abandon_session(&session, seats.b).unwrap();
        assert_eq!(abandoned.status, GameStatus::Abandoned);
        assert_eq!(abandoned.winner_id, None);
        assert_eq!(abandoned.board, session.board);
        assert_eq!(abandoned.move_count, session.move_count);
        assert_ne!(abandoned.revision, session.revision);

        assert_eq!(
            abandon_session(&abandoned, seats.a),
            Err(MoveError::GameEnded)
        );
    }
}
