//! The mutable population under training, plus everything worth keeping
//! between runs: performance history, best-score snapshots and the round
//! counter. This is the unit of checkpointing.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::{EnsembleAgent, TdLambdaAgent};
use crate::engine::PerformanceRec;
use crate::error::TrainError;
use crate::game::GameKind;
use crate::persist;
use crate::script::parse_script;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    kind: GameKind,
    round_id: u32,
    agents: Vec<TdLambdaAgent>,
    performances: Vec<PerformanceRec>,
    best_performance: Vec<PerformanceRec>,
    best_agents: Vec<TdLambdaAgent>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            kind: GameKind::Checkers,
            round_id: 0,
            agents: Vec::new(),
            performances: Vec::new(),
            best_performance: Vec::new(),
            best_agents: Vec::new(),
        }
    }
}

fn average_performance(performance: &[PerformanceRec]) -> PerformanceRec {
    let count = performance.len() as f64;
    let mut average = PerformanceRec::zero(0);
    for rec in performance {
        average.perf_white += rec.perf_white;
        average.perf_black += rec.perf_black;
        average.draws += rec.draws;
    }
    average.perf_white /= count;
    average.perf_black /= count;
    average.draws /= count;
    average
}

impl TrainingState {
    /// Builds the population from a script string. Every block clone gets a
    /// distinct `-N` name suffix and its own net initialization.
    pub fn from_script(text: &str, seed: u64) -> Result<Self, TrainError> {
        let blocks = parse_script(text)?;
        let mut state = Self::default();

        let mut agent_seed = seed;
        for (script, clones) in &blocks {
            for clone_id in 0..*clones {
                let mut agent = TdLambdaAgent::from_script(script, agent_seed)?;
                agent.set_name(format!("{}-{}", agent.name(), clone_id));
                state.agents.push(agent);
                agent_seed = agent_seed.wrapping_add(1);
            }
        }

        if state.agents.is_empty() {
            return Err(TrainError::ScriptParse("script defines no agents".into()));
        }
        Ok(state)
    }

    pub fn from_script_file(path: &Path, seed: u64) -> Result<Self, TrainError> {
        let text = fs::read_to_string(path)?;
        Self::from_script(&text, seed)
    }

    /// Applies a hyperparameter-adjustment script; the blocks must line up
    /// with the existing agents one to one.
    pub fn adjust_hyperparameters(&mut self, text: &str) -> Result<(), TrainError> {
        let blocks = parse_script(text)?;
        let mut agent_id = 0usize;
        for (script, clones) in &blocks {
            for _ in 0..*clones {
                let Some(agent) = self.agents.get_mut(agent_id) else {
                    return Err(TrainError::ScriptParse(
                        "adjustment script covers more agents than the state holds".into(),
                    ));
                };
                agent.assign_hyperparameters(script)?;
                agent_id += 1;
            }
        }
        if agent_id < self.agents.len() {
            return Err(TrainError::ScriptParse(
                "not all agents have been adjusted".into(),
            ));
        }
        Ok(())
    }

    pub fn adjust_hyperparameters_from_file(&mut self, path: &Path) -> Result<(), TrainError> {
        let text = fs::read_to_string(path)?;
        self.adjust_hyperparameters(&text)
    }

    /// One script line per agent, in the same grammar the parser accepts.
    pub fn agents_script(&self) -> String {
        self.agents
            .iter()
            .map(|agent| format!("{{{}}}", agent.to_script()))
            .join("\n")
    }

    pub fn add_agent(&mut self, agent: TdLambdaAgent) {
        self.agents.push(agent);
    }

    pub fn agents(&self) -> &[TdLambdaAgent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [TdLambdaAgent] {
        &mut self.agents
    }

    pub fn agent(&self, id: usize) -> Option<&TdLambdaAgent> {
        self.agents.get(id)
    }

    pub fn agents_count(&self) -> usize {
        self.agents.len()
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn round_id(&self) -> u32 {
        self.round_id
    }

    /// Bumps the round counter and returns the new value.
    pub fn increment_round(&mut self) -> u32 {
        self.round_id += 1;
        self.round_id
    }

    pub fn performances(&self) -> &[PerformanceRec] {
        &self.performances
    }

    pub fn best_performance(&self) -> &[PerformanceRec] {
        &self.best_performance
    }

    pub fn best_agents(&self) -> &[TdLambdaAgent] {
        &self.best_agents
    }

    /// Stores the per-agent records of a finished round and returns their
    /// average. Best-score snapshots are refreshed for every agent whose new
    /// score at least matches its previous best: an equal score from a later
    /// round wins, on the assumption that more training is better.
    pub fn add_performance_record(
        &mut self,
        performance: &[PerformanceRec],
    ) -> Result<PerformanceRec, TrainError> {
        if performance.is_empty() {
            return Err(TrainError::InconsistentState(
                "cannot record an empty performance vector".into(),
            ));
        }
        let mut average = average_performance(performance);
        average.round = performance[0].round;

        self.performances.push(average);
        self.register_performance(performance)?;
        Ok(average)
    }

    fn register_performance(&mut self, performance: &[PerformanceRec]) -> Result<(), TrainError> {
        if self.best_performance.is_empty() {
            self.best_performance = performance.to_vec();
            self.best_agents = self.agents.clone();
            return Ok(());
        }

        if self.best_performance.len() != performance.len()
            || self.best_agents.len() != self.agents.len()
            || self.best_performance.len() != self.agents.len()
        {
            return Err(TrainError::InconsistentState(
                "performance vector does not match the population".into(),
            ));
        }

        for id in 0..performance.len() {
            if self.best_performance[id].score() > performance[id].score() {
                continue;
            }
            self.best_performance[id] = performance[id];
            self.best_agents[id] = self.agents[id].clone();
        }
        Ok(())
    }

    /// Clears counters and history; the population survives only when asked
    /// to.
    pub fn reset(&mut self, keep_agents: bool) {
        self.round_id = 0;
        self.performances.clear();
        if keep_agents {
            return;
        }
        self.agents.clear();
        self.best_performance.clear();
        self.best_agents.clear();
    }

    pub fn set_discount(&mut self, discount: f64) {
        for agent in &mut self.agents {
            agent.set_discount(discount);
        }
    }

    pub fn set_lambda(&mut self, lambda: f64) {
        for agent in &mut self.agents {
            agent.set_lambda(lambda);
        }
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        for agent in &mut self.agents {
            agent.set_learning_rate(learning_rate);
        }
    }

    pub fn set_exploration(&mut self, exploration: f64) {
        for agent in &mut self.agents {
            agent.set_exploration(exploration);
        }
    }

    /// Saves the state blob; with `extended` a human-readable `.txt` script
    /// of all agents is written next to it.
    pub fn save_to_file(&self, path: &Path, extended: bool) -> Result<(), TrainError> {
        persist::save_blob(path, persist::STATE_MAGIC, self)?;

        if extended {
            if path.extension().is_some_and(|ext| ext == "txt") {
                return Err(TrainError::InconsistentState(
                    "a state file cannot have the `.txt` extension".into(),
                ));
            }
            fs::write(path.with_extension("txt"), self.agents_script())?;
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, TrainError> {
        persist::load_blob(path, persist::STATE_MAGIC)
    }

    /// Snapshots the current population as an ensemble named after the round.
    pub fn save_current_ensemble(
        &self,
        directory: &Path,
        tag: &str,
    ) -> Result<PathBuf, TrainError> {
        let name = format!("Ensemble_r_{}_{}", self.round_id, tag);
        let path = directory.join(format!("{name}.ena"));
        EnsembleAgent::new(&self.agents, name)?.save_to_file(&path)?;
        Ok(path)
    }

    /// Snapshots the best-score population as an ensemble named after its
    /// average score.
    pub fn save_best_score_ensemble(
        &self,
        directory: &Path,
        tag: &str,
    ) -> Result<PathBuf, TrainError> {
        if self.best_performance.is_empty() {
            return Err(TrainError::InconsistentState(
                "no performance has been recorded yet".into(),
            ));
        }
        let average = average_performance(&self.best_performance);
        let name = format!("Ensemble_s_{:.6}_{}", average.score(), tag);
        let path = directory.join(format!("{name}.ena"));
        EnsembleAgent::new(&self.best_agents, name)?.save_to_file(&path)?;
        Ok(path)
    }

    /// Fixed-width table of the averaged per-round performances.
    pub fn save_performance_report(&self, path: &Path) -> Result<(), TrainError> {
        let mut report = format!(
            "{:>10} {:>14} {:>14} {:>14} {:>14}\n",
            "Round", "White", "Black", "Draws", "Score"
        );
        for rec in &self.performances {
            report.push_str(&format!(
                "{:>10} {:>14.5} {:>14.5} {:>14.5} {:>14.5}\n",
                rec.round,
                rec.perf_white,
                rec.perf_black,
                rec.draws,
                rec.score()
            ));
        }
        fs::write(path, report)?;
        Ok(())
    }
}
