use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::agent::default_rng;
use crate::agent::TdLambdaAgent;
use crate::error::TrainError;
use crate::game::{GameResult, GameState, Move};
use crate::persist;

/// A committee of frozen [`TdLambdaAgent`]s.
///
/// In single-agent mode one member is drawn uniformly per episode and plays
/// the whole game; otherwise every member votes for a move index on every ply
/// and the plurality wins, ties broken by the lowest index. Ensembles never
/// train and ignore episode outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleAgent {
    id: Uuid,
    name: String,
    members: Vec<TdLambdaAgent>,
    single_agent_mode: bool,
    #[serde(skip)]
    chosen_member: Option<usize>,
    #[serde(skip, default = "default_rng")]
    rng: StdRng,
}

impl PartialEq for EnsembleAgent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.members == other.members
            && self.single_agent_mode == other.single_agent_mode
    }
}

impl EnsembleAgent {
    /// Builds an ensemble from frozen copies of the given agents.
    pub fn new(members: &[TdLambdaAgent], name: impl Into<String>) -> Result<Self, TrainError> {
        if members.is_empty() {
            return Err(TrainError::AgentMisconfigured(
                "an ensemble needs at least one member".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            members: members.iter().map(TdLambdaAgent::frozen_copy).collect(),
            single_agent_mode: false,
            chosen_member: None,
            rng: default_rng(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[TdLambdaAgent] {
        &self.members
    }

    pub fn single_agent_mode(&self) -> bool {
        self.single_agent_mode
    }

    pub fn set_single_agent_mode(&mut self, enabled: bool) {
        self.single_agent_mode = enabled;
        self.chosen_member = None;
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn make_move<S: GameState>(
        &mut self,
        state: &S,
        moves: &[Move],
    ) -> Result<usize, TrainError> {
        if moves.is_empty() {
            return Err(TrainError::InvalidMoveSet);
        }

        if self.single_agent_mode {
            let member = match self.chosen_member {
                Some(member) => member,
                None => {
                    let member = self.rng.gen_range(0..self.members.len());
                    self.chosen_member = Some(member);
                    member
                }
            };
            return self.members[member].greedy_move(state, moves);
        }

        let mut votes = vec![0u32; moves.len()];
        for member in &self.members {
            votes[member.greedy_move(state, moves)?] += 1;
        }
        // Plurality, ties broken by the lowest move index.
        let mut winner = 0;
        for (id, &count) in votes.iter().enumerate() {
            if count > votes[winner] {
                winner = id;
            }
        }
        Ok(winner)
    }

    /// Episodes leave no trace on an ensemble beyond re-drawing the member
    /// for single-agent mode.
    pub fn game_over(&mut self, _result: GameResult, _as_white: bool, _opponent_id: &str) {
        self.chosen_member = None;
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), TrainError> {
        persist::save_blob(path, persist::ENSEMBLE_MAGIC, self)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, TrainError> {
        persist::load_blob(path, persist::ENSEMBLE_MAGIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(seed: u64) -> TdLambdaAgent {
        TdLambdaAgent::new(&[4, 8, 1], 0.3, 0.5, 0.9, 0.05, format!("m{seed}"), seed).unwrap()
    }

    #[test]
    fn test_members_are_frozen() {
        let ensemble = EnsembleAgent::new(&[member(1), member(2)], "committee").unwrap();
        assert!(ensemble.members().iter().all(|m| !m.is_training()));
        assert!(ensemble.members().iter().all(|m| m.exploration() == 0.0));
    }

    #[test]
    fn test_empty_ensemble_is_rejected() {
        assert!(EnsembleAgent::new(&[], "empty").is_err());
    }

    fn takeaway_member(seed: u64) -> TdLambdaAgent {
        TdLambdaAgent::new(&[2, 8, 1], 0.0, 0.5, 0.9, 0.05, format!("t{seed}"), seed).unwrap()
    }

    #[test]
    fn test_vote_follows_the_members() {
        use crate::game::GameState;
        use crate::testgame::TakeAway;

        let members = [takeaway_member(1), takeaway_member(2)];
        let mut ensemble = EnsembleAgent::new(&members, "committee").unwrap();

        let state = TakeAway::with_remaining(5);
        let moves = state.legal_moves();
        let first = ensemble.members()[0].greedy_move(&state, &moves).unwrap();
        let second = ensemble.members()[1].greedy_move(&state, &moves).unwrap();

        // With two members either both agree, or each choice draws one vote
        // and the tie breaks toward the lowest index.
        let expected = if first == second { first } else { first.min(second) };
        assert_eq!(ensemble.make_move(&state, &moves).unwrap(), expected);
    }

    #[test]
    fn test_single_agent_mode_sticks_to_one_member_per_game() {
        use crate::game::GameState;
        use crate::testgame::TakeAway;

        let members = [takeaway_member(1), takeaway_member(2), takeaway_member(3)];
        let mut ensemble = EnsembleAgent::new(&members, "committee").unwrap();
        ensemble.set_single_agent_mode(true);
        ensemble.reseed(9);

        let state = TakeAway::with_remaining(7);
        let moves = state.legal_moves();
        let first = ensemble.make_move(&state, &moves).unwrap();
        for _ in 0..5 {
            assert_eq!(ensemble.make_move(&state, &moves).unwrap(), first);
        }
    }
}
