use serde::{Deserialize, Serialize};

/// Occupant of one dark square.
///
/// `Captured` and `Trace` are transient annotations that only appear in
/// preview states: a captured piece not yet lifted off the board, and the
/// square the moving piece started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Piece {
    #[default]
    Empty,
    Man,
    King,
    OpponentMan,
    OpponentKing,
    Captured,
    Trace,
}

impl Piece {
    pub fn is_ally(self) -> bool {
        matches!(self, Piece::Man | Piece::King)
    }

    pub fn is_opponent(self) -> bool {
        matches!(self, Piece::OpponentMan | Piece::OpponentKing)
    }

    pub fn is_king(self) -> bool {
        matches!(self, Piece::King | Piece::OpponentKing)
    }

    pub fn is_marker(self) -> bool {
        matches!(self, Piece::Captured | Piece::Trace)
    }

    /// The same piece as seen from the other side of the board.
    pub fn swapped(self) -> Piece {
        match self {
            Piece::Man => Piece::OpponentMan,
            Piece::King => Piece::OpponentKing,
            Piece::OpponentMan => Piece::Man,
            Piece::OpponentKing => Piece::King,
            other => other,
        }
    }

    /// Stable cell code used on the publish surface.
    pub fn code(self) -> i32 {
        match self {
            Piece::Empty => 0,
            Piece::Man => 1,
            Piece::King => 2,
            Piece::OpponentMan => -1,
            Piece::OpponentKing => -2,
            Piece::Captured => 3,
            Piece::Trace => 4,
        }
    }

    /// Numeric encoding fed to the value net; markers read as empty.
    pub fn feature(self) -> f64 {
        match self {
            Piece::Man => 1.0,
            Piece::King => 2.0,
            Piece::OpponentMan => -1.0,
            Piece::OpponentKing => -2.0,
            _ => 0.0,
        }
    }

    fn glyph(self) -> char {
        match self {
            Piece::Empty => '.',
            Piece::Man => 'm',
            Piece::King => 'M',
            Piece::OpponentMan => 'o',
            Piece::OpponentKing => 'O',
            Piece::Captured => 'x',
            Piece::Trace => '*',
        }
    }
}

impl std::fmt::Display for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.glyph())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapped_is_an_involution() {
        for piece in [
            Piece::Empty,
            Piece::Man,
            Piece::King,
            Piece::OpponentMan,
            Piece::OpponentKing,
            Piece::Captured,
            Piece::Trace,
        ] {
            assert_eq!(piece.swapped().swapped(), piece);
        }
    }

    #[test]
    fn test_markers_carry_no_feature_weight() {
        assert_eq!(Piece::Captured.feature(), 0.0);
        assert_eq!(Piece::Trace.feature(), 0.0);
    }
}
