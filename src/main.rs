//! # Strata
//!
//! Command-line driver for the retention engine. `simulate` runs the engine
//! against an in-memory store with concurrent readers pinning history;
//! `explain` prints the policy's decision for every version at a height.

use clap::{Args, Parser, Subcommand};
use simulation::simulate;
use std::path::PathBuf;
use std::process::ExitCode;
use strata_prune::{EngineConfig, EngineConfigBuilder};
use strata_retention::{PruningStrategy, RetentionPolicy};
use tracing_subscriber::EnvFilter;

pub mod simulation;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Version retention and flush engine for versioned stores")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit versions against an in-memory store and report what is retained
    Simulate {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Number of versions to commit
        #[arg(long, default_value_t = 100)]
        commits: u64,

        /// Concurrent readers pinning recent versions
        #[arg(long, default_value_t = 0)]
        readers: usize,

        /// Seed for the reader workload
        #[arg(long)]
        seed: Option<u64>,

        /// JSON engine configuration (overrides the policy flags)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show flush and retention decisions for every version up to a height
    Explain {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Current height
        #[arg(long)]
        height: u64,
    },
}

#[derive(Args)]
struct PolicyArgs {
    /// Named strategy: everything, nothing, syncable
    #[arg(long, default_value = "syncable")]
    strategy: String,

    /// Custom recency window (requires --keep-every)
    #[arg(long, requires = "keep_every")]
    keep_recent: Option<u64>,

    /// Custom flush interval (requires --keep-recent)
    #[arg(long, requires = "keep_recent")]
    keep_every: Option<u64>,
}

impl PolicyArgs {
    fn strategy(&self) -> Result<PruningStrategy, String> {
        match (self.keep_recent, self.keep_every) {
            (Some(keep_recent), Some(keep_every)) => Ok(PruningStrategy::Custom {
                keep_recent,
                keep_every,
            }),
            _ => self.strategy.parse().map_err(|e| format!("{}", e)),
        }
    }
}

fn load_config(policy: &PolicyArgs, path: Option<&PathBuf>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("reading {}: {}", path.display(), e))?;
            EngineConfig::from_json(&raw).map_err(|e| format!("parsing {}: {}", path.display(), e))
        }
        None => Ok(EngineConfigBuilder::new().strategy(policy.strategy()?).build()),
    }
}

fn explain(policy: &RetentionPolicy, height: u64) {
    println!("{} at height {}", policy, height);
    println!("{:>10}  {:>6}  {:>9}", "version", "flush", "retained");
    for version in 1..=height {
        let flush = if policy.should_flush(version) { "yes" } else { "-" };
        let retained = if policy.is_always_retained(version, height) {
            "yes"
        } else {
            "-"
        };
        println!("{:>10}  {:>6}  {:>9}", version, flush, retained);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            policy,
            commits,
            readers,
            seed,
            config,
        } => match load_config(&policy, config.as_ref()) {
            Ok(config) => simulate(config, commits, readers, seed)
                .await
                .map(|stats| stats.print())
                .map_err(|e| e.to_string()),
            Err(e) => Err(e),
        },
        Commands::Explain { policy, height } => policy
            .strategy()
            .and_then(|s| s.to_policy().map_err(|e| e.to_string()))
            .map(|p| explain(&p, height)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "strata failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
