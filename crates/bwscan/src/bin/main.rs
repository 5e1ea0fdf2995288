//! `bwscan` CLI binary entry point.
//!
//! This binary requires the `cli` feature to be enabled.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bwscan", version, about = "Tor relay bandwidth scanner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Scan(bwscan::cli::scan::Args),
    List(bwscan::cli::list::Args),
    Aggregate(bwscan::cli::aggregate::Args),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => bwscan::cli::scan::execute(args).await,
        Commands::List(args) => bwscan::cli::list::execute(args),
        Commands::Aggregate(args) => bwscan::cli::aggregate::execute(args).await,
    }
}
