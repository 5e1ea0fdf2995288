//! `bwscan aggregate` subcommand: combines every finished scan directory
//! under a data directory into the aggregate file format the voting
//! authorities consume, querying the control port for each surviving
//! relay's fresh bandwidth.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::aggregator::{aggregate, render};
use crate::control::tor::{TorAuth, TorControlClient};
use crate::util::scan_dir::list_scan_dirs;

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(long = "data-dir", env = "BWSCANNER_DATADIR", default_value = "./data")]
    pub data_dir: String,

    #[arg(long = "control-addr", default_value = "127.0.0.1:9051")]
    pub control_addr: String,

    /// Where to write the aggregate file; printed to stdout if omitted.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn execute(args: Args) -> anyhow::Result<()> {
    let measurements_dir = PathBuf::from(&args.data_dir).join("measurements");
    let entries = list_scan_dirs(&args.data_dir)?;
    let finished: Vec<PathBuf> = entries
        .into_iter()
        .filter(|e| !e.running)
        .map(|e| e.path)
        .collect();

    if finished.is_empty() {
        anyhow::bail!("no finished scan directories under {}", measurements_dir.display());
    }
    let oldest_timestamp = finished[0]
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let control = Arc::new(TorControlClient::connect(args.control_addr.as_str(), TorAuth::Null).await?);
    let lines = aggregate(control.as_ref(), &finished).await?;
    let rendered = render(&oldest_timestamp, &lines);

    match args.out {
        Some(path) => std::fs::write(&path, rendered)?,
        None => print!("{rendered}"),
    }
    Ok(())
}
