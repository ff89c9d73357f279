use anyhow::{Context, Result};
use clap::Parser;
use lotto_simulator::{Config, Simulator, ValidatedConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML simulation config.
    #[arg(short, long)]
    config: PathBuf,

    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Overrides `rounds` from the config file.
    #[arg(long)]
    rounds: Option<usize>,

    /// Overrides `seed` from the config file.
    #[arg(long)]
    seed: Option<u64>,
}

fn build_config(args: &Args, mut config: Config) -> Result<ValidatedConfig> {
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(rounds) = args.rounds {
        config.rounds = rounds;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate().context("invalid simulator config")
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let config = build_config(&args, config)?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();
    info!(
        players = config.players,
        rounds = config.rounds,
        ticket_price = config.lottery.ticket_price,
        min_players = config.lottery.min_players,
        seed = config.seed,
        "starting simulator"
    );

    let report = Simulator::new(config)?.run()?;
    info!(
        settled = report.settled,
        carried_over = report.carried_over,
        rejected = report.rejected,
        height = report.height,
        "simulation finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize report")?
    );
    Ok(())
}
