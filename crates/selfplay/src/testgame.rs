//! Minimal deterministic game used by the driver and engine tests: a pile of
//! stones, each side removes one or two, whoever cannot move loses. No
//! captures exist, so the quiet-move counter grows every ply.

use crate::game::{GameState, Move, SubMove};

#[derive(Debug, Clone)]
pub struct TakeAway {
    remaining: u8,
    inverted: bool,
}

impl TakeAway {
    pub fn with_remaining(remaining: u8) -> Self {
        Self { remaining, inverted: false }
    }
}

impl GameState for TakeAway {
    const FEATURE_COUNT: usize = 2;

    fn initial() -> Self {
        Self { remaining: 16, inverted: false }
    }

    fn legal_moves(&self) -> Vec<Move> {
        (1..=self.remaining.min(2))
            .map(|take| Move::single(SubMove::quiet(self.remaining, self.remaining - take)))
            .collect()
    }

    fn apply(&mut self, mv: &Move) {
        self.remaining = mv.end();
    }

    fn preview(&self, _mv: &Move) -> Self {
        self.clone()
    }

    fn invert(&mut self) {
        self.inverted = !self.inverted;
    }

    fn inverted(&self) -> bool {
        self.inverted
    }

    fn mirrored_move(&self, mv: &Move) -> Move {
        mv.clone()
    }

    fn features(&self) -> Vec<f64> {
        vec![f64::from(self.remaining) / 16.0, 1.0]
    }

    fn cells(&self) -> Vec<i32> {
        vec![i32::from(self.remaining)]
    }
}
