mod args;
mod optimize;
mod train;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Console trainer for self-play checkers agents.
#[derive(Parser)]
#[command(version, about, long_about = None)]
enum Cli {
    /// Train a population of agents built from a script or a saved state
    Train(args::TrainArgs),
    /// Search the hyperparameter space with the downhill-simplex method
    Optimize(args::OptimizeArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let outcome = match cli {
        Cli::Train(args) => train::run(args),
        Cli::Optimize(args) => optimize::run(args),
    };

    if let Err(err) = outcome {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
