// talos_backends/src/cli.rs

use clap::Args;
use std::path::PathBuf;

/// Arguments shared by the collection and rollout binaries.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// The path to the scenario TOML file to run.
    #[arg(short, long, default_value = "scenarios/rigid_teleop.toml")]
    pub scenario: PathBuf,

    /// Number of episodes to run.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub episodes: usize,

    /// Override the scenario's episode store directory.
    #[arg(long)]
    pub storage: Option<PathBuf>,
}

/// Initialise logging for a binary: RUST_LOG wins, "info" otherwise.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
