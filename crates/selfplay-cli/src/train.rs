//! Training mode: resume or build a population, run rounds, keep the output
//! folder stocked with dumps, ensembles and the performance report.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use checkers::Position;
use selfplay::engine::{CancelToken, RunConfig, TrainingEngine};
use selfplay::persist::DirLock;
use selfplay::state::TrainingState;
use selfplay::TrainError;

use crate::args::{seed_from_hash, TrainArgs};

/// Window of recent round times feeding the finish estimate.
const ROUND_TIME_WINDOW: usize = 5;

pub fn run(args: TrainArgs) -> Result<()> {
    args.validate()?;
    let hash = args.argument_hash()?;
    info!("{}", args.describe(&hash));

    fs::create_dir_all(&args.output).context("creating output folder")?;
    let _lock = DirLock::acquire(&args.output)?;
    let dump_name = TrainArgs::state_dump_name(&hash);
    let dump_path = args.output.join(&dump_name);

    let mut state = load_or_build_state(&args, &dump_path, seed_from_hash(&hash))?;
    info!("population:\n{}", state.agents_script());

    let mut cfg = RunConfig::new(args.rounds, args.episodes);
    cfg.start_round = state.round_id();
    cfg.eval_episodes = args.eval_episodes;
    cfg.fixed_pairs = args.fixed_pairs;

    let mut engine = TrainingEngine::new(seed_from_hash(&hash));
    let cancel = CancelToken::new();
    let seed = Position::start();

    let mut recent_times: VecDeque<u64> = VecDeque::new();
    let mut recent_sum: u64 = 0;
    let max_round = args.rounds;

    let mut reporter = |state: &mut TrainingState,
                        elapsed_ms: u64,
                        recs: &[selfplay::engine::PerformanceRec]|
     -> Result<(), TrainError> {
        let round = state.increment_round();

        recent_times.push_back(elapsed_ms);
        recent_sum += elapsed_ms;
        info!("round {round} time: {}", format_duration(elapsed_ms));
        if round < max_round {
            let estimate =
                u64::from(max_round - round) * recent_sum / recent_times.len() as u64;
            info!("expected time to finish training: {}", format_duration(estimate));
        }
        if recent_times.len() >= ROUND_TIME_WINDOW {
            if let Some(oldest) = recent_times.pop_front() {
                recent_sum -= oldest;
            }
        }

        for (agent, rec) in state.agents().iter().zip(recs) {
            info!("{} ({}) performance {rec}", agent.name(), agent.id());
        }
        let average = state.add_performance_record(recs)?;
        info!("average performance {average}");

        if args.dump_rounds != 0 && round % args.dump_rounds == 0 {
            state.save_to_file(&dump_path, true)?;
        }
        if args.save_rounds != 0 && round % args.save_rounds == 0 {
            let folder = args.output.join(format!("Round_{round}"));
            save_artifacts(state, &folder, &dump_name)?;
        }
        Ok(())
    };

    if args.auto_training {
        engine.run_auto(&mut state, &seed, &cfg, &mut reporter, &cancel)?;
    } else {
        engine.run(&mut state, &seed, &cfg, &mut reporter, &cancel)?;
    }

    save_artifacts(&state, &args.output, &dump_name)?;
    Ok(())
}

/// Resume priority: the hash-named dump in the output folder, then the source
/// as a state dump (counters reset, agents kept), then the source as a
/// script. A corrupt dump is logged and skipped, never fatal.
fn load_or_build_state(
    args: &TrainArgs,
    dump_path: &Path,
    seed: u64,
) -> Result<TrainingState> {
    match TrainingState::load_from_file(dump_path) {
        Ok(state) => {
            info!("state resumed from {}", dump_path.display());
            return Ok(state);
        }
        Err(TrainError::Io(_)) => {}
        Err(err) => warn!("ignoring unusable state dump: {err}"),
    }

    let mut state = match TrainingState::load_from_file(&args.source) {
        Ok(mut state) => {
            state.reset(true);
            info!("state constructed from the source dump");
            state
        }
        Err(err @ TrainError::Io(_)) => return Err(err.into()),
        Err(_) => {
            let state = TrainingState::from_script_file(&args.source, seed)
                .with_context(|| {
                    format!(
                        "failed to load or construct state from the given source: {}",
                        args.source.display()
                    )
                })?;
            info!("state constructed from the source script");
            state
        }
    };

    if let Some(adjustments) = &args.adjustments {
        state.adjust_hyperparameters_from_file(adjustments)?;
        info!("hyperparameters adjusted:\n{}", state.agents_script());
    }
    Ok(state)
}

/// Writes every artifact of the current state into `folder`: the tagged
/// ensemble of the population, the state dump with its script description,
/// the performance report and the best-score ensemble.
fn save_artifacts(state: &TrainingState, folder: &Path, dump_name: &str) -> Result<(), TrainError> {
    fs::create_dir_all(folder)?;

    let tag = state
        .performances()
        .last()
        .map(|rec| format!("{:.6}", rec.score()))
        .unwrap_or_else(|| "untrained".to_string());
    let ensemble_path = state.save_current_ensemble(folder, &tag)?;
    info!("ensemble was saved to {}", ensemble_path.display());

    state.save_to_file(&folder.join(dump_name), true)?;
    state.save_performance_report(&folder.join("Performance_report.txt"))?;

    if !state.best_performance().is_empty() {
        let best_path = state.save_best_score_ensemble(folder, "best_score")?;
        info!("best score ensemble was saved to {}", best_path.display());
    }
    Ok(())
}

/// `d.hh:mm:ss` rendition of a millisecond count.
fn format_duration(milliseconds: u64) -> String {
    let seconds = milliseconds / 1000;
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);
    format!("{days}.{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0.00:00:00");
        assert_eq!(format_duration(61_000), "0.00:01:01");
        assert_eq!(format_duration(90_061_000), "1.01:01:01");
    }
}
