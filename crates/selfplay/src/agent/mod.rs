//! Agents and the capability surface the board driver sees.
//!
//! The driver does not care which concrete policy it is talking to, so the
//! three player kinds are gathered behind the [`Agent`] tagged variant rather
//! than a trait object. Identity crosses the boundary as a string id.

mod ensemble;
mod random;
mod td_lambda;

pub use ensemble::EnsembleAgent;
pub use random::RandomAgent;
pub use td_lambda::{TdLambdaAgent, TrainingRecord};

use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use crate::error::TrainError;
use crate::game::{GameResult, GameState, Move};

/// Deterministic fallback rng used after deserialization; callers that need
/// reproducibility reseed explicitly.
pub(crate) fn default_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

/// A borrowed player of either kind, ready to be seated at a board.
pub enum Agent<'a> {
    TdLambda(&'a mut TdLambdaAgent),
    Ensemble(&'a mut EnsembleAgent),
    Random(&'a mut RandomAgent),
}

impl<'a> Agent<'a> {
    /// A shorter-lived view of the same player, so one agent can be seated at
    /// several boards in sequence.
    pub fn reborrow(&mut self) -> Agent<'_> {
        match self {
            Agent::TdLambda(agent) => Agent::TdLambda(&mut **agent),
            Agent::Ensemble(agent) => Agent::Ensemble(&mut **agent),
            Agent::Random(agent) => Agent::Random(&mut **agent),
        }
    }

    /// Picks one index into `moves`. Training agents also run their TD update
    /// as a side effect.
    pub fn make_move<S: GameState>(
        &mut self,
        state: &S,
        moves: &[Move],
    ) -> Result<usize, TrainError> {
        match self {
            Agent::TdLambda(agent) => agent.make_move(state, moves),
            Agent::Ensemble(agent) => agent.make_move(state, moves),
            Agent::Random(agent) => agent.make_move(state, moves),
        }
    }

    /// Notifies the agent that the episode ended.
    pub fn game_over(&mut self, result: GameResult, as_white: bool, opponent_id: &str) {
        match self {
            Agent::TdLambda(agent) => agent.game_over(result, as_white, opponent_id),
            Agent::Ensemble(agent) => agent.game_over(result, as_white, opponent_id),
            Agent::Random(agent) => agent.game_over(result, as_white, opponent_id),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Agent::TdLambda(agent) => agent.id(),
            Agent::Ensemble(agent) => agent.id(),
            Agent::Random(agent) => agent.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Agent::TdLambda(agent) => agent.name(),
            Agent::Ensemble(agent) => agent.name(),
            Agent::Random(agent) => agent.name(),
        }
    }
}

impl<'a> From<&'a mut TdLambdaAgent> for Agent<'a> {
    fn from(agent: &'a mut TdLambdaAgent) -> Self {
        Agent::TdLambda(agent)
    }
}

impl<'a> From<&'a mut EnsembleAgent> for Agent<'a> {
    fn from(agent: &'a mut EnsembleAgent) -> Self {
        Agent::Ensemble(agent)
    }
}

impl<'a> From<&'a mut RandomAgent> for Agent<'a> {
    fn from(agent: &'a mut RandomAgent) -> Self {
        Agent::Random(agent)
    }
}
