use serde::{Deserialize, Serialize};
use std::fmt;

use selfplay::game::{GameState, Move, SubMove};

use crate::moves;
use crate::piece::Piece;

/// Number of playable (dark) squares.
pub const FIELDS: usize = 32;

/// One side's view of the board: 32 dark-square occupancies plus a flag
/// recording whether this view is the 180°-rotated one.
///
/// Field `f` sits on row `f / 4` counted from the ally back rank; ally men
/// advance toward row 7 and promote there. Even rows hold the odd columns,
/// odd rows the even ones, so `invert` is a plain reversal of the cells with
/// the sides swapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    cells: [Piece; self::FIELDS],
    inverted: bool,
}

/// Row of a field, 0 = ally back rank.
pub(crate) fn row_of(field: u8) -> i8 {
    (field / 4) as i8
}

/// (row, column) coordinates of a field.
pub(crate) fn coords(field: u8) -> (i8, i8) {
    let row = (field / 4) as i8;
    let col = 2 * (field % 4) as i8 + i8::from(row % 2 == 0);
    (row, col)
}

/// Field at the given coordinates, if they name a dark square on the board.
pub(crate) fn field_at(row: i8, col: i8) -> Option<u8> {
    if !(0..8).contains(&row) || !(0..8).contains(&col) || (row + col) % 2 == 0 {
        return None;
    }
    Some((row * 4 + col / 2) as u8)
}

impl Position {
    pub fn empty() -> Self {
        Self { cells: [Piece::Empty; FIELDS], inverted: false }
    }

    /// Canonical start: twelve men each, three rows per side.
    pub fn start() -> Self {
        let mut position = Self::empty();
        for field in 0..12 {
            position.cells[field] = Piece::Man;
        }
        for field in 20..FIELDS {
            position.cells[field] = Piece::OpponentMan;
        }
        position
    }

    pub fn piece(&self, field: u8) -> Piece {
        self.cells[field as usize]
    }

    pub fn set_piece(&mut self, field: u8, piece: Piece) {
        self.cells[field as usize] = piece;
    }

    /// Applies `mv` for the ally side.
    ///
    /// With `preview` set, the start field keeps a trace marker and captured
    /// pieces stay on the board as captured markers for UI articulation.
    /// With `finalize` set, captured pieces are removed for good, a man
    /// landing on the back rank is promoted and any markers are cleared.
    pub fn make_move(&mut self, mv: &Move, finalize: bool, preview: bool) {
        let piece = self.cells[mv.start() as usize];
        self.cells[mv.start() as usize] = if preview { Piece::Trace } else { Piece::Empty };

        for sub in &mv.sub_moves {
            if let Some(captured) = sub.capture {
                self.cells[captured as usize] =
                    if preview { Piece::Captured } else { Piece::Empty };
            }
        }

        let landed = if mv.crowns() && piece == Piece::Man { Piece::King } else { piece };
        self.cells[mv.end() as usize] = landed;

        if finalize {
            for cell in &mut self.cells {
                if cell.is_marker() {
                    *cell = Piece::Empty;
                }
            }
        }
    }
}

impl GameState for Position {
    const FEATURE_COUNT: usize = FIELDS;

    fn initial() -> Self {
        Self::start()
    }

    fn legal_moves(&self) -> Vec<Move> {
        moves::legal_moves(self)
    }

    fn apply(&mut self, mv: &Move) {
        self.make_move(mv, true, false);
    }

    fn preview(&self, mv: &Move) -> Self {
        let mut marked = self.clone();
        marked.make_move(mv, false, true);
        marked
    }

    fn invert(&mut self) {
        self.cells.reverse();
        for cell in &mut self.cells {
            *cell = cell.swapped();
        }
        self.inverted = !self.inverted;
    }

    fn inverted(&self) -> bool {
        self.inverted
    }

    fn mirrored_move(&self, mv: &Move) -> Move {
        let mirror = |field: u8| (FIELDS as u8 - 1) - field;
        Move {
            sub_moves: mv
                .sub_moves
                .iter()
                .map(|sub| SubMove {
                    from: mirror(sub.from),
                    to: mirror(sub.to),
                    capture: sub.capture.map(mirror),
                    crowned: sub.crowned,
                })
                .collect(),
        }
    }

    fn features(&self) -> Vec<f64> {
        self.cells.iter().map(|cell| cell.feature()).collect()
    }

    fn cells(&self) -> Vec<i32> {
        self.cells.iter().map(|cell| cell.code()).collect()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in (0..8).rev() {
            for col in 0..8 {
                match field_at(row, col) {
                    Some(field) => write!(f, "{} ", self.piece(field))?,
                    None => write!(f, "  ")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_round_trips() {
        for field in 0..FIELDS as u8 {
            let (row, col) = coords(field);
            assert_eq!(field_at(row, col), Some(field));
        }
        assert_eq!(field_at(0, 0), None);
        assert_eq!(field_at(-1, 1), None);
        assert_eq!(field_at(8, 1), None);
    }

    #[test]
    fn test_invert_is_an_involution() {
        let mut position = Position::start();
        position.set_piece(13, Piece::King);
        position.set_piece(22, Piece::OpponentKing);

        let original = position.clone();
        position.invert();
        assert!(position.inverted());
        assert_ne!(position, original);
        position.invert();
        assert_eq!(position, original);
    }

    #[test]
    fn test_invert_swaps_sides() {
        let mut position = Position::empty();
        position.set_piece(0, Piece::Man);
        position.invert();
        assert_eq!(position.piece(31), Piece::OpponentMan);
    }

    #[test]
    fn test_start_position_counts() {
        let position = Position::start();
        let allies = (0..FIELDS as u8).filter(|&f| position.piece(f).is_ally()).count();
        let opponents = (0..FIELDS as u8)
            .filter(|&f| position.piece(f).is_opponent())
            .count();
        assert_eq!(allies, 12);
        assert_eq!(opponents, 12);
    }

    #[test]
    fn test_preview_keeps_markers_and_apply_clears_them() {
        let mut position = Position::empty();
        let from = field_at(2, 5).unwrap();
        let over = field_at(3, 4).unwrap();
        let to = field_at(4, 3).unwrap();
        position.set_piece(from, Piece::Man);
        position.set_piece(over, Piece::OpponentMan);

        let mv = Move::single(SubMove::jump(from, to, over));

        let preview = position.preview(&mv);
        assert_eq!(preview.piece(from), Piece::Trace);
        assert_eq!(preview.piece(over), Piece::Captured);
        assert_eq!(preview.piece(to), Piece::Man);

        position.apply(&mv);
        assert_eq!(position.piece(from), Piece::Empty);
        assert_eq!(position.piece(over), Piece::Empty);
        assert_eq!(position.piece(to), Piece::Man);
    }

    #[test]
    fn test_mirrored_move_round_trips() {
        let position = Position::start();
        let mv = Move::single(SubMove::jump(10, 17, 14));
        let mirrored = position.mirrored_move(&mv);
        assert_eq!(mirrored.start(), 21);
        assert_eq!(mirrored.end(), 14);
        assert_eq!(mirrored.sub_moves[0].capture, Some(17));
        assert_eq!(position.mirrored_move(&mirrored), mv);
    }

    #[test]
    fn test_features_follow_the_cells() {
        let mut position = Position::empty();
        position.set_piece(3, Piece::King);
        position.set_piece(9, Piece::OpponentMan);
        let features = position.features();
        assert_eq!(features.len(), FIELDS);
        assert_eq!(features[3], 2.0);
        assert_eq!(features[9], -1.0);
        assert_eq!(features.iter().filter(|&&f| f != 0.0).count(), 2);
    }
}
