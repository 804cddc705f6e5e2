//! Move generation.
//!
//! If any capture is available anywhere on the board, only capture moves are
//! legal, and every capture chain runs until the jumping piece has no further
//! capture. Men step forward only but capture along all four diagonals;
//! kings slide and capture any distance up to the first blocker. A man
//! reaching the back rank mid-chain is crowned on the spot and continues as
//! a king. Enumeration is deterministic: fields in ascending order, then the
//! directions NE, NW, SE, SW, then the nearest landing square first.

use smallvec::SmallVec;

use selfplay::game::{Move, SubMove};

use crate::piece::Piece;
use crate::position::{coords, field_at, row_of, Position, FIELDS};

/// NE, NW, SE, SW with north toward the promotion rank.
const DIRECTIONS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
const FORWARD: [(i8, i8); 2] = [(1, 1), (1, -1)];

pub(crate) fn legal_moves(position: &Position) -> Vec<Move> {
    let mut captures = Vec::new();
    for field in 0..FIELDS as u8 {
        if position.piece(field).is_ally() {
            chain_captures(position, field, &mut captures);
        }
    }
    if !captures.is_empty() {
        return captures;
    }

    let mut quiet = Vec::new();
    for field in 0..FIELDS as u8 {
        match position.piece(field) {
            Piece::Man => man_quiet_moves(position, field, &mut quiet),
            Piece::King => king_quiet_moves(position, field, &mut quiet),
            _ => {}
        }
    }
    quiet
}

fn man_quiet_moves(position: &Position, from: u8, out: &mut Vec<Move>) {
    let (row, col) = coords(from);
    for (dr, dc) in FORWARD {
        let Some(to) = field_at(row + dr, col + dc) else { continue };
        if position.piece(to) == Piece::Empty {
            out.push(Move::single(SubMove {
                from,
                to,
                capture: None,
                crowned: row_of(to) == 7,
            }));
        }
    }
}

fn king_quiet_moves(position: &Position, from: u8, out: &mut Vec<Move>) {
    let (row, col) = coords(from);
    for (dr, dc) in DIRECTIONS {
        let mut step = 1;
        while let Some(to) = field_at(row + step * dr, col + step * dc) {
            if position.piece(to) != Piece::Empty {
                break;
            }
            out.push(Move::single(SubMove::quiet(from, to)));
            step += 1;
        }
    }
}

/// Emits every complete capture chain starting at `start`.
fn chain_captures(position: &Position, start: u8, out: &mut Vec<Move>) {
    let piece = position.piece(start);
    let mut work = position.clone();
    // Lift the moving piece off the board so it never blocks its own chain.
    work.set_piece(start, Piece::Empty);
    let mut chain: SmallVec<[SubMove; 4]> = SmallVec::new();
    extend_chain(&mut work, start, piece.is_king(), &mut chain, out);
}

/// Depth-first continuation of a capture chain; emits the chain collected so
/// far whenever no further jump exists. Returns whether any jump was
/// available from `from`.
fn extend_chain(
    work: &mut Position,
    from: u8,
    is_king: bool,
    chain: &mut SmallVec<[SubMove; 4]>,
    out: &mut Vec<Move>,
) -> bool {
    let jumps = jump_candidates(work, from, is_king);
    if jumps.is_empty() {
        return false;
    }

    for (to, over) in jumps {
        let crowned = !is_king && row_of(to) == 7;
        let captured_piece = work.piece(over);
        // The captured piece stays on the board as a marker until the move
        // completes: it blocks slides and cannot be jumped twice.
        work.set_piece(over, Piece::Captured);
        chain.push(SubMove { from, to, capture: Some(over), crowned });

        if !extend_chain(work, to, is_king || crowned, chain, out) {
            out.push(Move { sub_moves: chain.clone() });
        }

        chain.pop();
        work.set_piece(over, captured_piece);
    }
    true
}

/// All `(landing, captured)` jumps for the piece standing on `from`.
fn jump_candidates(work: &Position, from: u8, is_king: bool) -> SmallVec<[(u8, u8); 4]> {
    let (row, col) = coords(from);
    let mut jumps = SmallVec::new();

    for (dr, dc) in DIRECTIONS {
        if is_king {
            let mut step = 1;
            let over = loop {
                let Some(next) = field_at(row + step * dr, col + step * dc) else {
                    break None;
                };
                if work.piece(next) != Piece::Empty {
                    break Some((next, step));
                }
                step += 1;
            };
            let Some((over, over_step)) = over else { continue };
            if !work.piece(over).is_opponent() {
                continue;
            }
            let mut landing = over_step + 1;
            while let Some(to) = field_at(row + landing * dr, col + landing * dc) {
                if work.piece(to) != Piece::Empty {
                    break;
                }
                jumps.push((to, over));
                landing += 1;
            }
        } else {
            let Some(over) = field_at(row + dr, col + dc) else { continue };
            let Some(to) = field_at(row + 2 * dr, col + 2 * dc) else { continue };
            if work.piece(over).is_opponent() && work.piece(to) == Piece::Empty {
                jumps.push((to, over));
            }
        }
    }
    jumps
}
