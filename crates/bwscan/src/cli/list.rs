//! `bwscan list` subcommand: lists finished and in-progress scan
//! directories under a data directory, oldest first.

use std::path::PathBuf;

use clap::Parser;

use crate::util::scan_dir::list_scan_dirs;

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(long = "data-dir", env = "BWSCANNER_DATADIR", default_value = "./data")]
    pub data_dir: String,
}

pub fn execute(args: Args) -> anyhow::Result<()> {
    let entries = list_scan_dirs(&args.data_dir)?;
    if entries.is_empty() {
        println!("no scan directories under {}", args.data_dir);
        return Ok(());
    }
    for entry in entries {
        let path: PathBuf = entry.path;
        let marker = if entry.running { " (running)" } else { "" };
        println!("{} {}{}", entry.epoch_seconds, path.display(), marker);
    }
    Ok(())
}
