//! Optimization mode: a Nelder–Mead search over the enabled hyperparameters,
//! each cost evaluation being one fixed-pair training round plus evaluation
//! from a fresh copy of the initial population.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use checkers::Position;
use selfplay::agent::TdLambdaAgent;
use selfplay::amoeba::NelderMead;
use selfplay::engine::{CancelToken, PerformanceRec, RunConfig, TrainingEngine};
use selfplay::persist::{self, DirLock, OPTIMIZER_MAGIC};
use selfplay::state::TrainingState;
use selfplay::TrainError;

use crate::args::{seed_from_hash, OptimizeArgs};

/// Axis step used to spread the initial simplex around the starting point.
const INITIAL_SIMPLEX_STEP: f64 = 0.1;

pub fn run(args: OptimizeArgs) -> Result<()> {
    args.validate()?;
    let hash = args.argument_hash()?;
    info!("{}", args.describe(&hash));

    fs::create_dir_all(&args.output).context("creating output folder")?;
    let _lock = DirLock::acquire(&args.output)?;
    let dump_path = args.output.join(format!("{hash}.sdmp"));
    let optimizer_path = args.output.join(format!("{hash}.amoeba"));

    let seed = seed_from_hash(&hash);
    let (state, resumed) = load_or_build_state(&args, &dump_path, seed)?;
    if state.agents_count() < 2 {
        bail!("optimization needs a population of at least two agents");
    }
    info!("population:\n{}", state.agents_script());

    let (point, lower, upper) = initial_point(&args, &state);

    let mut optimizer = match load_optimizer(&optimizer_path, resumed) {
        Some(optimizer) => optimizer,
        None => NelderMead::new(lower, upper, args.min_simplex)?,
    };
    let continue_search = optimizer.is_initialized();

    let mut evaluations = 0u32;
    optimizer.optimize(
        |params| {
            evaluations += 1;
            info!("evaluation: {evaluations}");
            info!("\n{}", render_parameters(params, &args, &state.agents()[0]));
            let score = evaluate_cost(params, &args, &state, seed)?;
            info!("score: {score:.6}");
            // The simplex minimizes, the trainer maximizes.
            Ok(-score)
        },
        INITIAL_SIMPLEX_STEP,
        &point,
        continue_search,
        |optimizer| {
            info!(
                "round {}: simplex size {:.6}, max score {:.6}",
                optimizer.rounds(),
                optimizer.simplex_size(),
                -optimizer.min_value()
            );
            if args.dump_rounds != 0 && optimizer.rounds() % args.dump_rounds == 0 {
                persist::save_blob(&optimizer_path, OPTIMIZER_MAGIC, optimizer)?;
            }
            Ok(())
        },
    )?;

    let report_path = args.output.join(format!("{hash}.txt"));
    let report = format!(
        "{}\n\nScore = {:.6}\n{}",
        args.describe(&hash),
        -optimizer.min_value(),
        render_parameters(optimizer.min_vertex(), &args, &state.agents()[0]),
    );
    fs::write(&report_path, report)?;
    info!("parameter report written to {}", report_path.display());
    Ok(())
}

fn load_or_build_state(
    args: &OptimizeArgs,
    dump_path: &Path,
    seed: u64,
) -> Result<(TrainingState, bool)> {
    match TrainingState::load_from_file(dump_path) {
        Ok(state) => {
            info!("state resumed from {}", dump_path.display());
            return Ok((state, true));
        }
        Err(TrainError::Io(_)) => {}
        Err(err) => warn!("ignoring unusable state dump: {err}"),
    }

    let mut state = TrainingState::from_script_file(&args.source, seed)?;
    sync_training_parameters(&mut state);
    state.save_to_file(dump_path, false)?;
    info!("state constructed from the source script");
    Ok((state, false))
}

fn load_optimizer(path: &Path, resumed: bool) -> Option<NelderMead> {
    if !resumed {
        return None;
    }
    match persist::load_blob(path, OPTIMIZER_MAGIC) {
        Ok(optimizer) => {
            info!("optimizer dump was successfully loaded");
            Some(optimizer)
        }
        Err(TrainError::Io(_)) => None,
        Err(err) => {
            warn!("ignoring unusable optimizer dump: {err}");
            None
        }
    }
}

/// The whole population explores one shared parameter point, so agent 0's
/// values stand for everyone's.
fn sync_training_parameters(state: &mut TrainingState) {
    if state.agents_count() < 2 {
        return;
    }
    let sample = &state.agents()[0];
    let (lambda, discount, rate, exploration) = (
        sample.lambda(),
        sample.discount(),
        sample.learning_rate(),
        sample.exploration(),
    );
    state.set_lambda(lambda);
    state.set_discount(discount);
    state.set_learning_rate(rate);
    state.set_exploration(exploration);
}

/// Starting point and box constraints, one entry per enabled flag in the
/// fixed order lambda, discount, learning rate, exploration.
fn initial_point(
    args: &OptimizeArgs,
    state: &TrainingState,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let sample = &state.agents()[0];
    let mut point = Vec::new();
    let mut lower = Vec::new();
    let mut upper = Vec::new();

    if args.lambda_flag {
        point.push(sample.lambda());
        lower.push(0.0);
        upper.push(1.0);
    }
    if args.discount_flag {
        point.push(sample.discount());
        lower.push(0.0);
        upper.push(1.0);
    }
    if args.rate_flag {
        point.push(sample.learning_rate());
        lower.push(0.0);
        upper.push(2.0);
    }
    if args.exploration_flag {
        point.push(sample.exploration());
        lower.push(0.0);
        upper.push(1.0);
    }
    (point, lower, upper)
}

/// Writes the parameter vector into the population, flag order again.
fn assign_parameters(state: &mut TrainingState, args: &OptimizeArgs, params: &[f64]) {
    let mut next = params.iter();
    if args.lambda_flag {
        if let Some(&value) = next.next() {
            state.set_lambda(value);
        }
    }
    if args.discount_flag {
        if let Some(&value) = next.next() {
            state.set_discount(value);
        }
    }
    if args.rate_flag {
        if let Some(&value) = next.next() {
            state.set_learning_rate(value);
        }
    }
    if args.exploration_flag {
        if let Some(&value) = next.next() {
            state.set_exploration(value);
        }
    }
}

/// Mean population score after one training round at the given parameter
/// point, starting from a fresh copy of the initial state every time.
fn evaluate_cost(
    params: &[f64],
    args: &OptimizeArgs,
    initial: &TrainingState,
    seed: u64,
) -> Result<f64, TrainError> {
    let mut state = initial.clone();
    assign_parameters(&mut state, args, params);

    let mut cfg = RunConfig::new(1, args.episodes);
    cfg.fixed_pairs = true;
    cfg.eval_episodes = args.eval_episodes;

    let mut engine = TrainingEngine::new(seed);
    let mut score = 0.0;
    let mut reporter =
        |_state: &mut TrainingState, _elapsed: u64, recs: &[PerformanceRec]| {
            score = recs.iter().map(PerformanceRec::score).sum::<f64>() / recs.len() as f64;
            Ok(())
        };
    engine.run(
        &mut state,
        &Position::start(),
        &cfg,
        &mut reporter,
        &CancelToken::new(),
    )?;
    Ok(score)
}

/// All four parameter lines; values not under optimization come from the
/// sample agent.
fn render_parameters(params: &[f64], args: &OptimizeArgs, sample: &TdLambdaAgent) -> String {
    let mut next = params.iter();
    let mut pick = |enabled: bool, fallback: f64| {
        if enabled {
            next.next().copied().unwrap_or(fallback)
        } else {
            fallback
        }
    };
    let lambda = pick(args.lambda_flag, sample.lambda());
    let discount = pick(args.discount_flag, sample.discount());
    let rate = pick(args.rate_flag, sample.learning_rate());
    let exploration = pick(args.exploration_flag, sample.exploration());
    format!(
        "Lambda = {lambda}\nDiscount = {discount}\nLearning rate = {rate}\nExploration = {exploration}"
    )
}
