use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::error::TrainError;
use crate::game::{GameResult, GameState, Move};

/// Picks uniformly among the legal moves. Useful as an evaluation baseline.
#[derive(Debug, Clone)]
pub struct RandomAgent {
    id: Uuid,
    name: String,
    rng: StdRng,
}

impl RandomAgent {
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn make_move<S: GameState>(
        &mut self,
        _state: &S,
        moves: &[Move],
    ) -> Result<usize, TrainError> {
        if moves.is_empty() {
            return Err(TrainError::InvalidMoveSet);
        }
        Ok(self.rng.gen_range(0..moves.len()))
    }

    pub fn game_over(&mut self, _result: GameResult, _as_white: bool, _opponent_id: &str) {}
}
