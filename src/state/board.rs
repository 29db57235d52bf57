//! 3x3 grid primitives and the pure terminal-state checks.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Width and height of the grid.
pub const GRID_SIZE: usize = 3;

/// Every line that wins when filled with a single mark: rows, columns, diagonals.
const LINES: [[(usize, usize); 3]; 8] = [
    [(0, 0), (0, 1), (0, 2)],
    [(1, 0), (1, 1), (1, 2)],
    [(2, 0), (2, 1), (2, 2)],
    [(0, 0), (1, 0), (2, 0)],
    [(0, 1), (1, 1), (2, 1)],
    [(0, 2), (1, 2), (2, 2)],
    [(0, 0), (1, 1), (2, 2)],
    [(0, 2), (1, 1), (2, 0)],
];

/// Content of a single cell.
///
/// Serialized as `"A"`, `"B"` or `null` to match the persisted board shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mark {
    /// Mark played by seat A.
    A,
    /// Mark played by seat B.
    B,
    /// Unplayed cell.
    #[default]
    Empty,
}

impl Mark {
    /// Whether the cell is still free.
    pub fn is_empty(self) -> bool {
        matches!(self, Mark::Empty)
    }

    /// The mark played by the other seat. `Empty` has no opponent.
    pub fn opponent(self) -> Mark {
        match self {
            Mark::A => Mark::B,
            Mark::B => Mark::A,
            Mark::Empty => Mark::Empty,
        }
    }
}

#[derive(Deserialize)]
enum MarkSymbol {
    A,
    B,
}

impl Serialize for Mark {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Mark::A => serializer.serialize_str("A"),
            Mark::B => serializer.serialize_str("B"),
            Mark::Empty => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Mark {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<MarkSymbol>::deserialize(deserializer)? {
            Some(MarkSymbol::A) => Mark::A,
            Some(MarkSymbol::B) => Mark::B,
            None => Mark::Empty,
        })
    }
}

/// Raised when a coordinate falls outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cell ({row}, {col}) is outside the 3x3 grid")]
pub struct OutOfBounds {
    /// Requested row.
    pub row: usize,
    /// Requested column.
    pub col: usize,
}

/// A validated `(row, col)` coordinate on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    row: usize,
    col: usize,
}

impl Position {
    /// Build a position, rejecting coordinates outside the grid.
    pub fn new(row: usize, col: usize) -> Result<Self, OutOfBounds> {
        if row >= GRID_SIZE || col >= GRID_SIZE {
            return Err(OutOfBounds { row, col });
        }
        Ok(Self { row, col })
    }

    /// Zero-based row index.
    pub fn row(self) -> usize {
        self.row
    }

    /// Zero-based column index.
    pub fn col(self) -> usize {
        self.col
    }
}

/// Snapshot of the 3x3 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board([[Mark; GRID_SIZE]; GRID_SIZE]);

impl Board {
    /// A board with every cell empty.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a board from explicit rows.
    pub fn from_rows(rows: [[Mark; GRID_SIZE]; GRID_SIZE]) -> Self {
        Self(rows)
    }

    /// Borrow the rows of the board.
    pub fn rows(&self) -> &[[Mark; GRID_SIZE]; GRID_SIZE] {
        &self.0
    }

    /// Mark stored at `position`.
    pub fn get(&self, position: Position) -> Mark {
        self.0[position.row][position.col]
    }

    /// Copy of this board with `mark` written at `position`.
    pub fn with_mark(&self, position: Position, mark: Mark) -> Self {
        let mut next = *self;
        next.0[position.row][position.col] = mark;
        next
    }

    /// Number of non-empty cells.
    pub fn filled_cells(&self) -> usize {
        self.0
            .iter()
            .flatten()
            .filter(|mark| !mark.is_empty())
            .count()
    }

    /// Whether every cell holds a mark.
    pub fn is_full(&self) -> bool {
        self.filled_cells() == GRID_SIZE * GRID_SIZE
    }
}

/// Return the mark owning a complete row, column or diagonal, if any.
pub fn check_winner(board: &Board) -> Option<Mark> {
    LINES.iter().find_map(|line| {
        let [first, second, third] = (*line).map(|(row, col)| board.0[row][col]);
        (!first.is_empty() && first == second && second == third).then_some(first)
    })
}

/// A board is drawn once it is full and nobody completed a line.
pub fn is_draw(board: &Board) -> bool {
    check_winner(board).is_none() && board.is_full()
}
