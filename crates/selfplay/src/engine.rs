//! Round scheduler: pairs the population, plays training episodes in
//! parallel, evaluates every agent against a frozen opponent and reports a
//! performance record per agent back to the caller.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::agent::{Agent, EnsembleAgent, TdLambdaAgent};
use crate::board::{Board, EpisodeObserver};
use crate::error::TrainError;
use crate::game::GameState;
use crate::state::TrainingState;

/// Cooperative cancellation flag shared between the caller and the episode
/// loops. Cancelling finishes the episode in flight as a draw, lets the
/// current round complete and stops the run at the round boundary.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of evaluating one agent after a round.
///
/// `perf_white`/`perf_black` are win ratios over the evaluation games played
/// with that color, `draws` the draw ratio over all of them; all lie in
/// [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRec {
    pub round: u32,
    pub perf_white: f64,
    pub perf_black: f64,
    pub draws: f64,
}

impl PerformanceRec {
    /// Weight of the draw ratio in the score. Draws are currently neither
    /// rewarded nor punished.
    pub const DRAW_WEIGHT: f64 = 0.0;

    pub fn zero(round: u32) -> Self {
        Self { round, perf_white: 0.0, perf_black: 0.0, draws: 0.0 }
    }

    pub fn score(&self) -> f64 {
        (self.perf_white + self.perf_black) / 2.0 - self.draws * Self::DRAW_WEIGHT
    }
}

impl fmt::Display for PerformanceRec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "white: {:.5}, black: {:.5}, draws: {:.5}, score: {:.5}",
            self.perf_white,
            self.perf_black,
            self.draws,
            self.score()
        )
    }
}

/// Knobs of one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub start_round: u32,
    pub max_round: u32,
    pub episodes: u32,
    pub eval_episodes: u32,
    pub fixed_pairs: bool,
    pub smart_training: bool,
    pub remove_outliers: bool,
    pub max_moves_without_capture: u32,
}

impl RunConfig {
    pub fn new(max_round: u32, episodes: u32) -> Self {
        Self {
            start_round: 0,
            max_round,
            episodes,
            eval_episodes: 1000,
            fixed_pairs: false,
            smart_training: false,
            remove_outliers: false,
            max_moves_without_capture: 200,
        }
    }
}

/// Outliers sit more than this many standard deviations below the mean score
/// before their parameters are replaced.
const OUTLIER_SIGMA: f64 = 1.5;

/// Agents whose score exceeds the round mean by this margin pause training
/// until the rest catch up.
const SMART_TRAINING_MARGIN: f64 = 0.05;

struct EngineObserver<'a> {
    cancel: &'a CancelToken,
}

impl EpisodeObserver for EngineObserver<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn error(&mut self, message: &str) {
        warn!("episode loop failed: {message}");
    }
}

/// Called at the end of every round with the training state, the round time
/// in milliseconds and one record per agent.
pub type Reporter<'a> =
    dyn FnMut(&mut TrainingState, u64, &[PerformanceRec]) -> Result<(), TrainError> + 'a;

/// Drives training rounds over the population of a [`TrainingState`].
///
/// Between rounds everything is single-threaded; within a round each pair of
/// agents is owned by exactly one worker task, so no locking is needed
/// anywhere in the episode path.
pub struct TrainingEngine {
    rng: StdRng,
    seed: u64,
    reference_opponent: Option<EnsembleAgent>,
    suspended: Vec<bool>,
}

impl TrainingEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            reference_opponent: None,
            suspended: Vec::new(),
        }
    }

    /// Evaluate against this frozen ensemble instead of each agent's own
    /// frozen copy.
    pub fn with_reference_opponent(mut self, opponent: EnsembleAgent) -> Self {
        self.reference_opponent = Some(opponent);
        self
    }

    /// Runs rounds of paired training followed by evaluation.
    ///
    /// Pairing is `(0,1), (2,3), …` when `fixed_pairs` is set and a fresh
    /// random matching otherwise; with an odd population the unmatched agent
    /// sits the round out. Episode failures inside one pair abort that pair
    /// for the round (its agents score zero) while the other pairs continue;
    /// state inconsistencies abort the whole run.
    pub fn run<S: GameState>(
        &mut self,
        state: &mut TrainingState,
        seed: &S,
        cfg: &RunConfig,
        reporter: &mut Reporter<'_>,
        cancel: &CancelToken,
    ) -> Result<(), TrainError> {
        if state.agents_count() < 2 {
            return Err(TrainError::AgentMisconfigured(
                "a training run needs at least two agents".into(),
            ));
        }
        if cfg.episodes == 0 {
            return Ok(());
        }

        self.suspended = vec![false; state.agents_count()];

        for round in cfg.start_round..cfg.max_round {
            if cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();

            self.prepare_round(state, round);

            let pairing = self.pairing(state.agents_count(), cfg.fixed_pairs);
            let errored = self.play_pairs(state, seed, cfg, &pairing, cancel)?;

            let recs = self.evaluate_all(state, seed, cfg, round, &errored, cancel)?;
            self.apply_population_policies(state, cfg, &recs);

            let elapsed = started.elapsed().as_millis() as u64;
            reporter(state, elapsed, &recs)?;
        }

        Ok(())
    }

    /// Self-play variant: every agent trains against a frozen copy of itself
    /// each round. Works for populations of any size.
    pub fn run_auto<S: GameState>(
        &mut self,
        state: &mut TrainingState,
        seed: &S,
        cfg: &RunConfig,
        reporter: &mut Reporter<'_>,
        cancel: &CancelToken,
    ) -> Result<(), TrainError> {
        if state.agents_count() == 0 {
            return Err(TrainError::AgentMisconfigured(
                "a training run needs at least one agent".into(),
            ));
        }
        if cfg.episodes == 0 {
            return Ok(());
        }

        self.suspended = vec![false; state.agents_count()];

        for round in cfg.start_round..cfg.max_round {
            if cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();

            self.prepare_round(state, round);

            let results: Vec<(usize, Result<(), TrainError>)> = state
                .agents_mut()
                .par_iter_mut()
                .enumerate()
                .map(|(id, agent)| {
                    let mut sparring = agent.frozen_copy();
                    let mut board: Board<'_, S> =
                        Board::new(&mut *agent, &mut sparring);
                    let mut observer = EngineObserver { cancel };
                    let outcome = board.play(
                        cfg.episodes,
                        seed,
                        cfg.max_moves_without_capture,
                        &mut observer,
                    );
                    (id, outcome)
                })
                .collect();
            let errored = collect_errors(results)?;

            let recs = self.evaluate_all(state, seed, cfg, round, &errored, cancel)?;
            self.apply_population_policies(state, cfg, &recs);

            let elapsed = started.elapsed().as_millis() as u64;
            reporter(state, elapsed, &recs)?;
        }

        Ok(())
    }

    fn prepare_round(&mut self, state: &mut TrainingState, round: u32) {
        for (id, agent) in state.agents_mut().iter_mut().enumerate() {
            agent.set_round(round + 1);
            agent.set_training(!self.suspended.get(id).copied().unwrap_or(false));
        }
    }

    /// Agent indices in seating order; consecutive entries form a pair.
    fn pairing(&mut self, count: usize, fixed: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..count).collect();
        if !fixed {
            order.shuffle(&mut self.rng);
        }
        order
    }

    fn play_pairs<S: GameState>(
        &self,
        state: &mut TrainingState,
        seed: &S,
        cfg: &RunConfig,
        pairing: &[usize],
        cancel: &CancelToken,
    ) -> Result<Vec<usize>, TrainError> {
        let mut rank = vec![0usize; pairing.len()];
        for (position, &agent_id) in pairing.iter().enumerate() {
            rank[agent_id] = position;
        }

        let mut seated: Vec<(usize, &mut TdLambdaAgent)> =
            state.agents_mut().iter_mut().enumerate().collect();
        seated.sort_by_key(|(id, _)| rank[*id]);

        let results: Vec<(Vec<usize>, Result<(), TrainError>)> = seated
            .par_chunks_mut(2)
            .map(|chunk| {
                let [(id_a, left), (id_b, right)] = chunk else {
                    // Odd population: the unmatched agent sits this round out.
                    return (Vec::new(), Ok(()));
                };
                let ids = vec![*id_a, *id_b];
                let mut board: Board<'_, S> = Board::new(&mut **left, &mut **right);
                let mut observer = EngineObserver { cancel };
                let outcome = board.play(
                    cfg.episodes,
                    seed,
                    cfg.max_moves_without_capture,
                    &mut observer,
                );
                (ids, outcome)
            })
            .collect();

        let mut errored = Vec::new();
        for (ids, outcome) in results {
            match outcome {
                Ok(()) => {}
                Err(err @ TrainError::InconsistentState(_)) => return Err(err),
                Err(err) => {
                    warn!("pair {ids:?} aborted for this round: {err}");
                    errored.extend(ids);
                }
            }
        }
        Ok(errored)
    }

    /// Plays the evaluation tournament for every agent on a frozen ε=0
    /// snapshot: half the games as white, half as black.
    fn evaluate_all<S: GameState>(
        &self,
        state: &TrainingState,
        seed: &S,
        cfg: &RunConfig,
        round: u32,
        errored: &[usize],
        cancel: &CancelToken,
    ) -> Result<Vec<PerformanceRec>, TrainError> {
        let base_seed = self.seed ^ (u64::from(round) << 32);
        let reported_round = round + 1;

        let results: Vec<Result<PerformanceRec, TrainError>> = state
            .agents()
            .par_iter()
            .enumerate()
            .map(|(id, agent)| {
                if errored.contains(&id) {
                    return Ok(PerformanceRec::zero(reported_round));
                }
                match self.evaluate_agent(
                    agent,
                    seed,
                    cfg,
                    reported_round,
                    base_seed.wrapping_add(id as u64),
                    cancel,
                ) {
                    Ok(rec) => Ok(rec),
                    Err(err @ TrainError::InconsistentState(_)) => Err(err),
                    Err(err) => {
                        warn!("evaluation of agent {} failed: {err}", agent.name());
                        Ok(PerformanceRec::zero(reported_round))
                    }
                }
            })
            .collect();

        results.into_iter().collect()
    }

    fn evaluate_agent<S: GameState>(
        &self,
        agent: &TdLambdaAgent,
        seed: &S,
        cfg: &RunConfig,
        round: u32,
        eval_seed: u64,
        cancel: &CancelToken,
    ) -> Result<PerformanceRec, TrainError> {
        let half = cfg.eval_episodes / 2;
        if half == 0 {
            return Ok(PerformanceRec::zero(round));
        }

        let mut snapshot = agent.frozen_copy();
        snapshot.reseed(eval_seed);

        let (wins_white, wins_black, draws) = match &self.reference_opponent {
            Some(reference) => {
                let mut opponent = reference.clone();
                opponent.reseed(eval_seed ^ 0x9e3779b97f4a7c15);
                self.play_both_colors(
                    &mut snapshot,
                    &mut Agent::from(&mut opponent),
                    seed,
                    cfg,
                    half,
                    cancel,
                )?
            }
            None => {
                let mut opponent = agent.frozen_copy();
                opponent.reseed(eval_seed ^ 0x9e3779b97f4a7c15);
                self.play_both_colors(
                    &mut snapshot,
                    &mut Agent::from(&mut opponent),
                    seed,
                    cfg,
                    half,
                    cancel,
                )?
            }
        };

        let total = f64::from(half * 2);
        Ok(PerformanceRec {
            round,
            perf_white: f64::from(wins_white) / f64::from(half),
            perf_black: f64::from(wins_black) / f64::from(half),
            draws: f64::from(draws) / total,
        })
    }

    fn play_both_colors<S: GameState>(
        &self,
        snapshot: &mut TdLambdaAgent,
        opponent: &mut Agent<'_>,
        seed: &S,
        cfg: &RunConfig,
        half: u32,
        cancel: &CancelToken,
    ) -> Result<(u32, u32, u32), TrainError> {
        let mut observer = EngineObserver { cancel };

        let mut board: Board<'_, S> = Board::new(&mut *snapshot, opponent.reborrow());
        board.play(half, seed, cfg.max_moves_without_capture, &mut observer)?;
        let wins_white = board.whites_wins();
        let draws_first = half - board.whites_wins() - board.blacks_wins();

        board.swap_agents();
        board.play(half, seed, cfg.max_moves_without_capture, &mut observer)?;
        let wins_black = board.blacks_wins();
        let draws_second = half - board.whites_wins() - board.blacks_wins();

        Ok((wins_white, wins_black, draws_first + draws_second))
    }

    fn apply_population_policies(
        &mut self,
        state: &mut TrainingState,
        cfg: &RunConfig,
        recs: &[PerformanceRec],
    ) {
        if recs.is_empty() {
            return;
        }
        let scores: Vec<f64> = recs.iter().map(PerformanceRec::score).collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;

        if cfg.remove_outliers {
            let variance =
                scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / scores.len() as f64;
            let threshold = mean - OUTLIER_SIGMA * variance.sqrt();
            let best = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(id, _)| id);
            if let Some(best) = best {
                let donor = state.agents()[best].clone();
                for (id, agent) in state.agents_mut().iter_mut().enumerate() {
                    if id != best && scores[id] < threshold {
                        warn!(
                            "agent {} scored {:.5}, below the outlier threshold {:.5}; \
                             adopting the leader's parameters",
                            agent.name(),
                            scores[id],
                            threshold
                        );
                        agent.adopt_parameters(&donor);
                    }
                }
            }
        }

        if cfg.smart_training {
            self.suspended = scores
                .iter()
                .map(|&score| score > mean + SMART_TRAINING_MARGIN)
                .collect();
        }
    }
}

fn collect_errors(
    results: Vec<(usize, Result<(), TrainError>)>,
) -> Result<Vec<usize>, TrainError> {
    let mut errored = Vec::new();
    for (id, outcome) in results {
        match outcome {
            Ok(()) => {}
            Err(err @ TrainError::InconsistentState(_)) => return Err(err),
            Err(err) => {
                warn!("agent {id} aborted for this round: {err}");
                errored.push(id);
            }
        }
    }
    Ok(errored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testgame::TakeAway;

    fn population(count: usize) -> TrainingState {
        let script = format!("{{Name=t;NetDimensions=2,4,1;Exploration=0.1}}[{count}]");
        TrainingState::from_script(&script, 42).unwrap()
    }

    fn quick_config(rounds: u32) -> RunConfig {
        let mut cfg = RunConfig::new(rounds, 4);
        cfg.eval_episodes = 8;
        cfg
    }

    #[test]
    fn test_run_rejects_lone_agent() {
        let mut state = population(1);
        let mut engine = TrainingEngine::new(0);
        let outcome = engine.run(
            &mut state,
            &TakeAway::initial(),
            &quick_config(1),
            &mut |_, _, _| Ok(()),
            &CancelToken::new(),
        );
        assert!(matches!(outcome, Err(TrainError::AgentMisconfigured(_))));
    }

    #[test]
    fn test_zero_episodes_skips_the_round_loop() {
        let mut state = population(2);
        let mut engine = TrainingEngine::new(0);
        let mut cfg = quick_config(3);
        cfg.episodes = 0;

        let mut reports = 0;
        engine
            .run(
                &mut state,
                &TakeAway::initial(),
                &cfg,
                &mut |_, _, _| {
                    reports += 1;
                    Ok(())
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(reports, 0);
    }

    #[test]
    fn test_run_reports_once_per_round() {
        let mut state = population(4);
        let mut engine = TrainingEngine::new(7);

        let mut rounds = Vec::new();
        engine
            .run(
                &mut state,
                &TakeAway::initial(),
                &quick_config(2),
                &mut |_, _, recs| {
                    assert_eq!(recs.len(), 4);
                    assert!(recs.iter().all(|r| {
                        (0.0..=1.0).contains(&r.perf_white)
                            && (0.0..=1.0).contains(&r.perf_black)
                            && (0.0..=1.0).contains(&r.draws)
                    }));
                    rounds.push(recs[0].round);
                    Ok(())
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(rounds, [1, 2]);
    }

    #[test]
    fn test_fixed_pairs_runs_with_odd_population() {
        let mut state = population(3);
        let mut engine = TrainingEngine::new(7);
        let mut cfg = quick_config(1);
        cfg.fixed_pairs = true;

        let mut reports = 0;
        engine
            .run(
                &mut state,
                &TakeAway::initial(),
                &cfg,
                &mut |_, _, recs| {
                    assert_eq!(recs.len(), 3);
                    reports += 1;
                    Ok(())
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(reports, 1);
    }

    #[test]
    fn test_run_auto_trains_a_single_agent() {
        let mut state = population(1);
        let mut engine = TrainingEngine::new(3);

        let mut reports = 0;
        engine
            .run_auto(
                &mut state,
                &TakeAway::initial(),
                &quick_config(2),
                &mut |_, _, recs| {
                    assert_eq!(recs.len(), 1);
                    reports += 1;
                    Ok(())
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(reports, 2);
    }

    #[test]
    fn test_cancelled_token_stops_at_the_round_boundary() {
        let mut state = population(2);
        let mut engine = TrainingEngine::new(0);
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut reports = 0;
        engine
            .run(
                &mut state,
                &TakeAway::initial(),
                &quick_config(10),
                &mut |_, _, _| {
                    reports += 1;
                    Ok(())
                },
                &cancel,
            )
            .unwrap();
        assert_eq!(reports, 0);
    }

    #[test]
    fn test_victory_raises_the_final_afterstate_value() {
        // One episode with a linear net, gamma = 1, lambda = 0: the winner's
        // valuation of the terminal after-state must strictly increase.
        use crate::board::{Board, NullObserver};

        let mut white =
            TdLambdaAgent::new(&[2, 1], 0.0, 0.0, 1.0, 0.1, "white", 21).unwrap();
        let mut black =
            TdLambdaAgent::new(&[2, 1], 0.0, 0.0, 1.0, 0.1, "black", 22).unwrap();
        let terminal = TakeAway::with_remaining(0);
        let white_before = white.evaluate(&terminal);
        let black_before = black.evaluate(&terminal);

        let mut board: Board<TakeAway> = Board::new(&mut white, &mut black);
        board.play(1, &TakeAway::initial(), 100, &mut NullObserver).unwrap();
        let white_won = board.whites_wins() == 1;

        if white_won {
            assert!(white.evaluate(&terminal) > white_before);
        } else {
            assert!(black.evaluate(&terminal) > black_before);
        }
    }
}
