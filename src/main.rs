#![recursion_limit = "256"]

use clap::{Parser, Subcommand};
use log::info;

mod cli;

#[derive(Parser)]
#[command(
    name = "elastic-nas",
    version,
    about = "Elastic super-network training and aging-evolution search"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write an example run configuration
    Init(cli::init::InitArgs),
    /// Train the super-network with progressive shrinking
    Shrink(cli::shrink::ShrinkArgs),
    /// Search sub-networks with aging evolution
    Search(cli::search::SearchArgs),
    /// Print analytical cost estimates
    Estimate(cli::estimate::EstimateArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let cli = Cli::parse();
    info!("elastic-nas {}", env!("CARGO_PKG_VERSION"));
    match cli.command {
        Command::Init(args) => cli::init::cmd_init(args),
        Command::Shrink(args) => cli::shrink::cmd_shrink(args),
        Command::Search(args) => cli::search::cmd_search(args),
        Command::Estimate(args) => cli::estimate::cmd_estimate(args),
    }
}
