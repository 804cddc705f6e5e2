//! Command-line surfaces of the two modes and the argument digest that names
//! their resume dumps.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args};
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use twox_hash::XxHash64;

/// Flags of the training mode.
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Path to a saved state or to an agent-script file
    #[arg(long)]
    pub source: PathBuf,

    /// Number of training rounds
    #[arg(long)]
    pub rounds: u32,

    /// Number of episodes (plays) in each round
    #[arg(long)]
    pub episodes: u32,

    /// Output folder path
    #[arg(long)]
    pub output: PathBuf,

    /// Path to an agent-script file adjusting parameters of `source` agents
    #[arg(long)]
    pub adjustments: Option<PathBuf>,

    /// Number of evaluation episodes (plays) after each round
    #[arg(long = "eval_episodes", default_value_t = 1000)]
    pub eval_episodes: u32,

    /// Keep agent pairs fixed during all the training
    #[arg(long = "fixed_pairs", default_value_t = false, action = ArgAction::Set)]
    pub fixed_pairs: bool,

    /// Train each agent against a frozen copy of itself
    #[arg(long = "auto_training", default_value_t = false, action = ArgAction::Set)]
    pub auto_training: bool,

    /// Dump the state to disk every N rounds (0 = never)
    #[arg(long = "dump_rounds", default_value_t = 0)]
    pub dump_rounds: u32,

    /// Save all artifacts to a round sub-folder every N rounds (0 = never)
    #[arg(long = "save_rounds", default_value_t = 0)]
    pub save_rounds: u32,
}

impl TrainArgs {
    pub fn validate(&self) -> Result<()> {
        if !self.source.is_file() {
            bail!("invalid source file: {}", self.source.display());
        }
        if let Some(adjustments) = &self.adjustments {
            if !adjustments.is_file() {
                bail!("invalid adjustments file: {}", adjustments.display());
            }
        }
        if self.rounds == 0 {
            bail!("number of rounds should be a positive integer");
        }
        if self.episodes == 0 {
            bail!("number of episodes should be a positive integer");
        }
        if self.eval_episodes == 0 {
            bail!("number of evaluation episodes should be a positive integer");
        }
        Ok(())
    }

    /// Stable digest of the invocation; runs with an identical digest resume
    /// from the same dump files.
    ///
    /// The digest is XxHash64 (seed 0) over, in order: the source file bytes,
    /// the adjustment file bytes when that file exists, every numeric flag as
    /// decimal ASCII (`rounds`, `episodes`, `eval_episodes`, `save_rounds`,
    /// `dump_rounds`), the uppercased output path, and the boolean flags as
    /// `0`/`1` (`fixed_pairs`, `auto_training`). Rendered as 16 lowercase hex
    /// digits.
    pub fn argument_hash(&self) -> Result<String> {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(&fs::read(&self.source).context("reading source file")?);
        if let Some(adjustments) = &self.adjustments {
            if adjustments.is_file() {
                hasher.write(&fs::read(adjustments).context("reading adjustments file")?);
            }
        }
        for numeric in [
            self.rounds,
            self.episodes,
            self.eval_episodes,
            self.save_rounds,
            self.dump_rounds,
        ] {
            hasher.write(numeric.to_string().as_bytes());
        }
        hasher.write(self.output.to_string_lossy().to_uppercase().as_bytes());
        for flag in [self.fixed_pairs, self.auto_training] {
            hasher.write(if flag { b"1" } else { b"0" });
        }
        Ok(format!("{:016x}", hasher.finish()))
    }

    pub fn state_dump_name(hash: &str) -> String {
        format!("{hash}.sdmp")
    }

    pub fn describe(&self, hash: &str) -> String {
        format!(
            " Source path: {}\n Adjustments path: {}\n Rounds: {}\n Episodes per round: {}\n \
             Evaluation episodes per round: {}\n Output folder: {}\n Fixed pairs: {}\n \
             Auto training: {}\n Dump rounds: {}\n Save rounds: {}\n Hash: {}",
            self.source.display(),
            self.adjustments
                .as_deref()
                .map(Path::display)
                .map(|p| p.to_string())
                .unwrap_or_default(),
            self.rounds,
            self.episodes,
            self.eval_episodes,
            self.output.display(),
            self.fixed_pairs,
            self.auto_training,
            self.dump_rounds,
            self.save_rounds,
            hash,
        )
    }
}

/// Flags of the optimization mode.
#[derive(Args, Debug, Clone)]
pub struct OptimizeArgs {
    /// Path to an agent-script file defining the population to optimize
    #[arg(long)]
    pub source: PathBuf,

    /// Number of training episodes per cost evaluation
    #[arg(long)]
    pub episodes: u32,

    /// Output folder path
    #[arg(long)]
    pub output: PathBuf,

    /// Simplex size below which the search stops
    #[arg(long = "min_simplex", default_value_t = 0.001)]
    pub min_simplex: f64,

    /// Number of evaluation episodes per cost evaluation
    #[arg(long = "eval_episodes", default_value_t = 1000)]
    pub eval_episodes: u32,

    /// Dump the optimizer to disk every N rounds (0 = never)
    #[arg(long = "dump_rounds", default_value_t = 0)]
    pub dump_rounds: u32,

    /// Optimize the trace-decay parameter lambda
    #[arg(long = "lambda_flag", action = ArgAction::SetTrue)]
    pub lambda_flag: bool,

    /// Optimize the reward discount
    #[arg(long = "discount_flag", action = ArgAction::SetTrue)]
    pub discount_flag: bool,

    /// Optimize the learning rate
    #[arg(long = "rate_flag", action = ArgAction::SetTrue)]
    pub rate_flag: bool,

    /// Optimize the exploration probability
    #[arg(long = "exploration_flag", action = ArgAction::SetTrue)]
    pub exploration_flag: bool,
}

impl OptimizeArgs {
    pub fn validate(&self) -> Result<()> {
        if !self.source.is_file() {
            bail!("invalid source file: {}", self.source.display());
        }
        if self.episodes == 0 {
            bail!("number of episodes should be a positive integer");
        }
        if self.eval_episodes == 0 {
            bail!("number of evaluation episodes should be a positive integer");
        }
        if self.min_simplex <= 0.0 {
            bail!("minimal simplex size should be positive");
        }
        if !(self.lambda_flag || self.discount_flag || self.rate_flag || self.exploration_flag) {
            bail!("at least one parameter flag must be set");
        }
        Ok(())
    }

    /// Same construction as [`TrainArgs::argument_hash`]: source bytes, the
    /// numeric flags `episodes`, `eval_episodes`, `dump_rounds` and
    /// `min_simplex` as decimal ASCII, the uppercased output path, then the
    /// boolean flags `lambda`, `discount`, `rate`, `exploration` as `0`/`1`.
    pub fn argument_hash(&self) -> Result<String> {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(&fs::read(&self.source).context("reading source file")?);
        for numeric in [self.episodes, self.eval_episodes, self.dump_rounds] {
            hasher.write(numeric.to_string().as_bytes());
        }
        hasher.write(self.min_simplex.to_string().as_bytes());
        hasher.write(self.output.to_string_lossy().to_uppercase().as_bytes());
        for flag in [
            self.lambda_flag,
            self.discount_flag,
            self.rate_flag,
            self.exploration_flag,
        ] {
            hasher.write(if flag { b"1" } else { b"0" });
        }
        Ok(format!("{:016x}", hasher.finish()))
    }

    pub fn describe(&self, hash: &str) -> String {
        format!(
            " Source path: {}\n Episodes per evaluation: {}\n Evaluation episodes: {}\n \
             Output folder: {}\n Min simplex size: {}\n Dump rounds: {}\n Lambda flag: {}\n \
             Discount flag: {}\n Rate flag: {}\n Exploration flag: {}\n Hash: {}",
            self.source.display(),
            self.episodes,
            self.eval_episodes,
            self.output.display(),
            self.min_simplex,
            self.dump_rounds,
            self.lambda_flag,
            self.discount_flag,
            self.rate_flag,
            self.exploration_flag,
            hash,
        )
    }
}

/// Engine seed derived from the argument digest, so a resumed run shuffles
/// and evaluates the same way.
pub fn seed_from_hash(hash: &str) -> u64 {
    u64::from_str_radix(hash, 16).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train_args(dir: &Path, source: &Path) -> TrainArgs {
        TrainArgs {
            source: source.to_path_buf(),
            rounds: 10,
            episodes: 100,
            output: dir.join("out"),
            adjustments: None,
            eval_episodes: 1000,
            fixed_pairs: false,
            auto_training: false,
            dump_rounds: 0,
            save_rounds: 0,
        }
    }

    #[test]
    fn test_hash_is_stable_across_equivalent_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("agents.txt");
        fs::write(&source, "{Name=a}").unwrap();

        let a = train_args(dir.path(), &source).argument_hash().unwrap();
        let b = train_args(dir.path(), &source).argument_hash().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_hash_tracks_flag_and_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("agents.txt");
        fs::write(&source, "{Name=a}").unwrap();

        let base = train_args(dir.path(), &source).argument_hash().unwrap();

        let mut changed = train_args(dir.path(), &source);
        changed.rounds = 11;
        assert_ne!(changed.argument_hash().unwrap(), base);

        let mut flagged = train_args(dir.path(), &source);
        flagged.auto_training = true;
        assert_ne!(flagged.argument_hash().unwrap(), base);

        fs::write(&source, "{Name=b}").unwrap();
        assert_ne!(train_args(dir.path(), &source).argument_hash().unwrap(), base);
    }

    #[test]
    fn test_hash_ignores_output_path_case() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("agents.txt");
        fs::write(&source, "{Name=a}").unwrap();

        let mut lower = train_args(dir.path(), &source);
        lower.output = PathBuf::from("results");
        let mut upper = train_args(dir.path(), &source);
        upper.output = PathBuf::from("RESULTS");
        assert_eq!(
            lower.argument_hash().unwrap(),
            upper.argument_hash().unwrap()
        );
    }
}
