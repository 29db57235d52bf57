use proptest::prelude::*;
use tandem_grid::{
    services::move_service::{MoveError, apply_move},
    state::{
        board::{GRID_SIZE, Position},
        session::{GameSession, GameStatus, Seats},
    },
};
use uuid::Uuid;

fn cell_order() -> impl Strategy<Value = Vec<usize>> {
    Just((0..GRID_SIZE * GRID_SIZE).collect::<Vec<_>>()).prop_shuffle()
}

fn position(cell: usize) -> Position {
    Position::new(cell / GRID_SIZE, cell % GRID_SIZE).unwrap()
}

proptest! {
    #[test]
    fn turn_alternates_until_the_game_ends(order in cell_order()) {
        let seats = Seats { a: Uuid::new_v4(), b: Uuid::new_v4() };
        let mut session = GameSession::new("couple-42", seats, seats.a);

        for cell in order {
            let actor = session.current_player_id;

            if session.status != GameStatus::Playing {
                let frozen = session.clone();
                for player in [seats.a, seats.b] {
                    prop_assert_eq!(
                        apply_move(&session, position(cell), player),
                        Err(MoveError::GameEnded)
                    );
                }
                prop_assert_eq!(&session, &frozen);
                continue;
            }

            let next = apply_move(&session, position(cell), actor).unwrap();
            prop_assert_eq!(next.move_count as usize, next.board.filled_cells());
            prop_assert_eq!(next.move_count, session.move_count + 1);
            prop_assert_eq!(next.revision, session.revision + 1);
            prop_assert_eq!(next.check_invariants(), Ok(()));

            if next.status == GameStatus::Playing {
                prop_assert_eq!(Some(next.current_player_id), seats.other(actor));
            } else {
                prop_assert_eq!(next.current_player_id, actor);
            }
            session = next;
        }

        prop_assert!(session.is_terminal());
    }
}
