//! Checkers rules for the self-play trainer.
//!
//! The board is the 32 dark squares of an 8×8 board, always seen from the
//! side to move: "ally" pieces advance toward row 7 and the position is
//! inverted after every ply. Capturing is mandatory and capture chains are
//! played to completion; kings fly along diagonals, and a man promoted in
//! the middle of a chain continues capturing as a king.

mod moves;
mod piece;
mod position;

pub use piece::Piece;
pub use position::{Position, FIELDS};
