use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::agent::default_rng;
use crate::error::TrainError;
use crate::game::{GameResult, GameState, Move};
use crate::net::ValueNet;
use crate::persist;
use crate::script::AgentScript;

/// Outcome of one finished episode, kept by the agent for later inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub round: u32,
    pub opponent_id: String,
    pub result: GameResult,
    pub as_white: bool,
}

/// A value-network-backed player updated by the TD(λ) rule.
///
/// During training the agent keeps the after-state of its previous move; each
/// new move produces the temporal-difference error
/// `δ = r + γ·v(s') − v(s)` which is applied along the eligibility trace held
/// inside the net. Exploration is ε-greedy, consulted independently on every
/// ply, and exploratory moves update on-policy like any other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdLambdaAgent {
    id: Uuid,
    name: String,
    net: ValueNet,
    exploration: f64,
    lambda: f64,
    discount: f64,
    learning_rate: f64,
    training: bool,
    search_mode: bool,
    round: u32,
    records: Vec<TrainingRecord>,
    #[serde(skip)]
    prev_afterstate: Option<Vec<f64>>,
    #[serde(skip, default = "default_rng")]
    rng: StdRng,
}

fn check_unit(value: f64, what: &str) -> Result<(), TrainError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(TrainError::AgentMisconfigured(format!(
            "{what} must lie in [0, 1], got {value}"
        )));
    }
    Ok(())
}

impl TdLambdaAgent {
    pub fn new(
        net_dimensions: &[usize],
        exploration: f64,
        lambda: f64,
        discount: f64,
        learning_rate: f64,
        name: impl Into<String>,
        seed: u64,
    ) -> Result<Self, TrainError> {
        check_unit(exploration, "exploration probability")?;
        check_unit(lambda, "lambda")?;
        check_unit(discount, "discount")?;
        if !(learning_rate > 0.0 && learning_rate <= 2.0) {
            return Err(TrainError::AgentMisconfigured(format!(
                "learning rate must lie in (0, 2], got {learning_rate}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let net = ValueNet::new(net_dimensions, &mut rng)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            net,
            exploration,
            lambda,
            discount,
            learning_rate,
            training: true,
            search_mode: false,
            round: 0,
            records: Vec::new(),
            prev_afterstate: None,
            rng,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn search_mode(&self) -> bool {
        self.search_mode
    }

    pub fn net_dimensions(&self) -> &[usize] {
        self.net.dimensions()
    }

    pub fn records(&self) -> &[TrainingRecord] {
        &self.records
    }

    // Hyperparameters coming through the setters are clamped into their valid
    // ranges; only construction rejects out-of-range values outright.

    pub fn set_exploration(&mut self, value: f64) {
        self.exploration = value.clamp(0.0, 1.0);
    }

    pub fn set_lambda(&mut self, value: f64) {
        self.lambda = value.clamp(0.0, 1.0);
    }

    pub fn set_discount(&mut self, value: f64) {
        self.discount = value.clamp(0.0, 1.0);
    }

    pub fn set_learning_rate(&mut self, value: f64) {
        self.learning_rate = value.clamp(f64::EPSILON, 2.0);
    }

    /// Training and single-agent search mode are mutually exclusive; enabling
    /// training drops search mode.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        if training {
            self.search_mode = false;
        }
    }

    pub fn set_search_mode(&mut self, search_mode: bool) {
        self.search_mode = search_mode;
        if search_mode {
            self.training = false;
        }
    }

    /// Round index stamped onto training records produced from now on.
    pub fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    /// Makes move selection reproducible.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Copies the value net and the hyperparameters of `donor`, keeping
    /// identity and history.
    pub fn adopt_parameters(&mut self, donor: &TdLambdaAgent) {
        self.net = donor.net.clone();
        self.exploration = donor.exploration;
        self.lambda = donor.lambda;
        self.discount = donor.discount;
        self.learning_rate = donor.learning_rate;
        self.prev_afterstate = None;
    }

    /// A frozen copy for evaluation or ensemble membership: same parameters,
    /// training off, no exploration.
    pub fn frozen_copy(&self) -> TdLambdaAgent {
        let mut copy = self.clone();
        copy.training = false;
        copy.exploration = 0.0;
        copy.prev_afterstate = None;
        copy
    }

    /// Greedy argmax over after-state values, lowest index winning ties.
    /// Does not touch the trace, the rng or the stored after-state.
    pub fn greedy_move<S: GameState>(
        &self,
        state: &S,
        moves: &[Move],
    ) -> Result<usize, TrainError> {
        if moves.is_empty() {
            return Err(TrainError::InvalidMoveSet);
        }
        let mut best = 0;
        let mut best_value = f64::NEG_INFINITY;
        for (id, mv) in moves.iter().enumerate() {
            let mut after = state.clone();
            after.apply(mv);
            let value = self.net.eval(&after.features());
            if value > best_value {
                best_value = value;
                best = id;
            }
        }
        Ok(best)
    }

    /// Selects a move and, in training mode, applies the TD(λ) correction for
    /// the previous after-state.
    pub fn make_move<S: GameState>(
        &mut self,
        state: &S,
        moves: &[Move],
    ) -> Result<usize, TrainError> {
        if moves.is_empty() {
            return Err(TrainError::InvalidMoveSet);
        }
        if state.features().len() != self.net.input_len() {
            return Err(TrainError::AgentMisconfigured(format!(
                "net expects {} inputs but the game encodes {} features",
                self.net.input_len(),
                state.features().len()
            )));
        }

        let greedy = self.greedy_move(state, moves)?;
        let explore = self.training && self.rng.gen::<f64>() < self.exploration;
        let chosen = if explore {
            self.rng.gen_range(0..moves.len())
        } else {
            greedy
        };

        if self.training {
            let mut after = state.clone();
            after.apply(&moves[chosen]);
            let new_afterstate = after.features();

            if let Some(prev) = self.prev_afterstate.take() {
                // Non-terminal reward is zero.
                let delta =
                    self.discount * self.net.eval(&new_afterstate) - self.net.eval(&prev);
                self.net
                    .eligibility_update(&prev, self.lambda * self.discount);
                self.net.apply_td(delta, self.learning_rate);
            }
            self.prev_afterstate = Some(new_afterstate);
        }

        Ok(chosen)
    }

    /// Terminal update: pulls the value of the last after-state toward the
    /// terminal reward, then resets the trace for the next episode.
    pub fn game_over(&mut self, result: GameResult, as_white: bool, opponent_id: &str) {
        if self.training {
            if let Some(prev) = self.prev_afterstate.take() {
                let delta = result.reward() - self.net.eval(&prev);
                self.net
                    .eligibility_update(&prev, self.lambda * self.discount);
                self.net.apply_td(delta, self.learning_rate);
            }
            self.net.reset_trace();
            self.records.push(TrainingRecord {
                round: self.round,
                opponent_id: opponent_id.to_string(),
                result,
                as_white,
            });
        }
        self.prev_afterstate = None;
    }

    /// Evaluates an after-state directly; exposed for tests and diagnostics.
    pub fn evaluate<S: GameState>(&self, afterstate: &S) -> f64 {
        self.net.eval(&afterstate.features())
    }

    /// One-line `key=value;` rendition of the agent's configuration, the same
    /// syntax the script parser accepts.
    pub fn to_script(&self) -> String {
        let dims = self
            .net
            .dimensions()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "Name={};Exploration={};Lambda={};Discount={};LearningRate={};NetDimensions={}",
            self.name, self.exploration, self.lambda, self.discount, self.learning_rate, dims
        )
    }

    /// Builds a fresh agent from a parsed script block, filling unspecified
    /// keys with defaults.
    pub fn from_script(script: &AgentScript, seed: u64) -> Result<Self, TrainError> {
        Self::new(
            script.net_dimensions.as_deref().unwrap_or(&[32, 64, 32, 1]),
            script.exploration.unwrap_or(0.05),
            script.lambda.unwrap_or(0.8),
            script.discount.unwrap_or(0.95),
            script.learning_rate.unwrap_or(0.01),
            script.name.clone().unwrap_or_else(|| "agent".to_string()),
            seed,
        )
    }

    /// Adjusts hyperparameters from a script block. The net itself is fixed,
    /// so a `NetDimensions` key is rejected.
    pub fn assign_hyperparameters(&mut self, script: &AgentScript) -> Result<(), TrainError> {
        if script.net_dimensions.is_some() {
            return Err(TrainError::ScriptParse(
                "NetDimensions cannot be adjusted on an existing agent".into(),
            ));
        }
        if let Some(name) = &script.name {
            self.name = name.clone();
        }
        if let Some(value) = script.exploration {
            self.set_exploration(value);
        }
        if let Some(value) = script.lambda {
            self.set_lambda(value);
        }
        if let Some(value) = script.discount {
            self.set_discount(value);
        }
        if let Some(value) = script.learning_rate {
            self.set_learning_rate(value);
        }
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), TrainError> {
        persist::save_blob(path, persist::AGENT_MAGIC, self)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, TrainError> {
        persist::load_blob(path, persist::AGENT_MAGIC)
    }
}

impl PartialEq for TdLambdaAgent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.net == other.net
            && self.exploration == other.exploration
            && self.lambda == other.lambda
            && self.discount == other.discount
            && self.learning_rate == other.learning_rate
            && self.training == other.training
            && self.search_mode == other.search_mode
            && self.round == other.round
            && self.records == other.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_hyperparameters() {
        assert!(TdLambdaAgent::new(&[4, 1], 1.5, 0.5, 0.5, 0.1, "a", 0).is_err());
        assert!(TdLambdaAgent::new(&[4, 1], 0.1, -0.5, 0.5, 0.1, "a", 0).is_err());
        assert!(TdLambdaAgent::new(&[4, 1], 0.1, 0.5, 1.5, 0.1, "a", 0).is_err());
        assert!(TdLambdaAgent::new(&[4, 1], 0.1, 0.5, 0.5, 0.0, "a", 0).is_err());
        assert!(TdLambdaAgent::new(&[4, 1], 0.1, 0.5, 0.5, 2.5, "a", 0).is_err());
    }

    #[test]
    fn test_setters_clamp() {
        let mut agent = TdLambdaAgent::new(&[4, 1], 0.1, 0.5, 0.5, 0.1, "a", 0).unwrap();
        agent.set_exploration(7.0);
        agent.set_lambda(-3.0);
        agent.set_learning_rate(9.0);
        assert_eq!(agent.exploration(), 1.0);
        assert_eq!(agent.lambda(), 0.0);
        assert_eq!(agent.learning_rate(), 2.0);
    }

    #[test]
    fn test_training_disables_search_mode() {
        let mut agent = TdLambdaAgent::new(&[4, 1], 0.1, 0.5, 0.5, 0.1, "a", 0).unwrap();
        agent.set_search_mode(true);
        assert!(!agent.is_training());
        agent.set_training(true);
        assert!(!agent.search_mode());
    }

    #[test]
    fn test_agent_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.tda");

        let agent = TdLambdaAgent::new(&[4, 8, 1], 0.1, 0.5, 0.9, 0.05, "keeper", 17).unwrap();
        agent.save_to_file(&path).unwrap();
        let loaded = TdLambdaAgent::load_from_file(&path).unwrap();

        assert_eq!(loaded, agent);
        assert_eq!(loaded.id(), agent.id());
    }

    #[test]
    fn test_script_round_trip() {
        let agent =
            TdLambdaAgent::new(&[32, 16, 1], 0.25, 0.5, 0.75, 0.125, "scripted", 3).unwrap();
        let script = agent.to_script();
        let parsed = crate::script::parse_script(&format!("{{{script}}}")).unwrap();
        let rebuilt = TdLambdaAgent::from_script(&parsed[0].0, 3).unwrap();
        assert_eq!(rebuilt.name(), "scripted");
        assert_eq!(rebuilt.exploration(), 0.25);
        assert_eq!(rebuilt.lambda(), 0.5);
        assert_eq!(rebuilt.discount(), 0.75);
        assert_eq!(rebuilt.learning_rate(), 0.125);
        assert_eq!(rebuilt.net_dimensions(), &[32, 16, 1]);
    }
}
