//! Game trait and related types.
//!
//! The board driver and the agents are written against [`GameState`]; the
//! rules of a concrete game (checkers being the primary one) live in their
//! own crate and plug in here.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Sentinel-free articulation of one leg of a move.
///
/// Capture moves may chain several sub-moves; each sub-move records the field
/// the piece left, the field it landed on, the field of a captured piece (if
/// any) and whether the piece reached the back rank on this leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMove {
    pub from: u8,
    pub to: u8,
    pub capture: Option<u8>,
    pub crowned: bool,
}

impl SubMove {
    pub fn quiet(from: u8, to: u8) -> Self {
        Self { from, to, capture: None, crowned: false }
    }

    pub fn jump(from: u8, to: u8, capture: u8) -> Self {
        Self { from, to, capture: Some(capture), crowned: false }
    }
}

/// An ordered, non-empty chain of sub-moves.
///
/// Non-capture moves have exactly one sub-move; a move is a capture move iff
/// its first sub-move captures. Consecutive sub-moves share their
/// endpoint/startpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Move {
    pub sub_moves: SmallVec<[SubMove; 4]>,
}

impl Move {
    pub fn single(sub: SubMove) -> Self {
        let mut sub_moves = SmallVec::new();
        sub_moves.push(sub);
        Self { sub_moves }
    }

    /// Field the moving piece starts from.
    pub fn start(&self) -> u8 {
        self.sub_moves[0].from
    }

    /// Field the moving piece finally lands on.
    pub fn end(&self) -> u8 {
        self.sub_moves[self.sub_moves.len() - 1].to
    }

    pub fn is_capture(&self) -> bool {
        self.sub_moves[0].capture.is_some()
    }

    /// True when any leg of the chain reaches the back rank.
    pub fn crowns(&self) -> bool {
        self.sub_moves.iter().any(|s| s.crowned)
    }

    pub fn captured_fields(&self) -> impl Iterator<Item = u8> + '_ {
        self.sub_moves.iter().filter_map(|s| s.capture)
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start())?;
        for sub in &self.sub_moves {
            write!(f, "{}{}", if sub.capture.is_some() { 'x' } else { '-' }, sub.to)?;
        }
        Ok(())
    }
}

/// Outcome of one episode from the point of view of a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    Victory,
    Loss,
    Draw,
}

impl GameResult {
    /// Terminal reward fed into the TD update.
    pub fn reward(self) -> f64 {
        match self {
            GameResult::Victory => 1.0,
            GameResult::Loss => -1.0,
            GameResult::Draw => 0.0,
        }
    }
}

/// Kind tag carried by persisted blobs so a dump knows which game produced it.
///
/// Chess is declared for forward compatibility of the on-disk format; only
/// checkers rules are implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameKind {
    Checkers,
    Chess,
}

/// Represents one side's view of a position in a two-player
/// perfect-information game.
///
/// Every position is seen from the perspective of the side to move (the
/// "ally"); after a move is applied the board is inverted so that the
/// opponent becomes the ally in turn. `invert` must be an involution.
pub trait GameState: Clone + Send + Sync + 'static {
    /// Length of the feature vector produced by [`GameState::features`].
    const FEATURE_COUNT: usize;

    /// The canonical start position, non-inverted, first player to move.
    fn initial() -> Self;

    /// All legal moves for the ally side, in a deterministic order.
    fn legal_moves(&self) -> Vec<Move>;

    /// Applies the move for real: captured pieces are removed, promotions
    /// take effect and no transient markers remain.
    fn apply(&mut self, mv: &Move);

    /// Returns a marked copy for UI articulation: the start field and the
    /// captured fields carry transient markers instead of being cleared.
    fn preview(&self, mv: &Move) -> Self;

    /// Reflects the board 180 degrees and swaps the two sides.
    fn invert(&mut self);

    /// Whether this state is currently seen from the second player's side.
    fn inverted(&self) -> bool;

    /// Maps a move expressed in the current perspective onto the opposite
    /// one, for publishing in canonical orientation.
    fn mirrored_move(&self, mv: &Move) -> Move;

    /// Fixed-size numeric encoding of the position for the value net.
    fn features(&self) -> Vec<f64>;

    /// Raw cell codes for the publish surface.
    fn cells(&self) -> Vec<i32>;
}
