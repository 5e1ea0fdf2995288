//! `bwscan scan` subcommand: layers a TOML config file under environment
//! variables under explicit flags, connects to the control port, fetches a
//! consensus snapshot, and drives one
//! [`crate::orchestrator::MeasurementOrchestrator`] scan (or an unbounded
//! sequence of them under `scan_continuous`, set via the config file since
//! there is no dedicated CLI flag for it).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::attacher::Attacher;
use crate::config::ScanConfig;
use crate::consensus;
use crate::control::tor::{TorAuth, TorControlClient};
use crate::orchestrator::MeasurementOrchestrator;

use super::logging::{self, LoggingConfig};

#[derive(Parser, Debug)]
pub struct Args {
    /// Base TOML config file; CLI flags below override whatever it sets.
    #[arg(long, default_value = "bwscan.toml")]
    pub config: PathBuf,

    #[arg(long)]
    pub partitions: Option<usize>,

    #[arg(long = "current-partition")]
    pub current_partition: Option<usize>,

    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long = "request-limit")]
    pub request_limit: Option<usize>,

    #[arg(long = "data-dir", env = "BWSCANNER_DATADIR")]
    pub data_dir: Option<String>,

    #[arg(long = "loglevel", default_value = "info")]
    pub loglevel: String,

    #[arg(long = "logfile", env = "BWSCANNER_LOGFILE")]
    pub logfile: Option<PathBuf>,

    #[arg(long = "launch-tor", overrides_with = "no_launch_tor")]
    pub launch_tor: bool,

    #[arg(long = "no-launch-tor", overrides_with = "launch_tor")]
    pub no_launch_tor: bool,

    #[arg(long = "circuit-build-timeout")]
    pub circuit_build_timeout: Option<u64>,

    /// Control port address; required plumbing to reach the daemon at all.
    #[arg(long = "control-addr", default_value = "127.0.0.1:9051")]
    pub control_addr: String,
}

pub async fn execute(args: Args) -> anyhow::Result<()> {
    let logfile = args.logfile.unwrap_or_else(default_logfile);
    logging::init_logging(LoggingConfig {
        logfile,
        level: args.loglevel.clone(),
    })?;

    let mut config = if args.config.exists() {
        ScanConfig::from_file(&args.config)?
    } else {
        tracing::warn!(path = %args.config.display(), "config file not found, using defaults");
        ScanConfig::default()
    };

    if let Some(partitions) = args.partitions {
        config.partitions = partitions;
    }
    if let Some(current_partition) = args.current_partition {
        config.this_partition = current_partition;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    if let Some(request_limit) = args.request_limit {
        config.request_limit = request_limit;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    } else if !args.config.exists() {
        // No config file and no override: fall back to the platform data
        // directory rather than the bare-TOML-default's "./data".
        config.data_dir = default_data_dir().to_string_lossy().into_owned();
    }
    if let Some(circuit_build_timeout) = args.circuit_build_timeout {
        config.circuit_build_timeout_secs = circuit_build_timeout;
    }
    config.validate()?;

    if args.launch_tor {
        launch_tor_daemon(&config.data_dir)?;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let control = Arc::new(TorControlClient::connect(args.control_addr.as_str(), TorAuth::Null).await?);
    let attacher = Attacher::spawn(control.clone());
    let orchestrator = MeasurementOrchestrator::new(control.clone(), attacher, config);
    orchestrator.configure_daemon().await?;

    let snapshot = consensus::fetch_consensus(control.as_ref()).await?;
    let finished_dir = orchestrator.run(&snapshot).await?;
    println!("{}", finished_dir.display());

    Ok(())
}

/// Platform data directory (`~/.local/share/bwscan` on Linux, etc.) used
/// when neither a config file nor `--data-dir`/`BWSCANNER_DATADIR` name
/// one. Falls back to `./data` if the platform has no resolvable home
/// directory (e.g. a minimal container).
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "bwscan")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_logfile() -> PathBuf {
    directories::ProjectDirs::from("", "", "bwscan")
        .map(|dirs| dirs.cache_dir().join("bwscan.log"))
        .unwrap_or_else(|| PathBuf::from("bwscan.log"))
}

/// Spawns a Tor process bound to the control port the rest of this
/// subcommand connects to. The process is left running in the background;
/// stopping it is the operator's responsibility, matching the daemon's own
/// `--RunAsDaemon` convention.
fn launch_tor_daemon(data_dir: &str) -> anyhow::Result<()> {
    std::process::Command::new("tor")
        .arg("--ControlPort")
        .arg("9051")
        .arg("--CookieAuthentication")
        .arg("0")
        .arg("--DataDirectory")
        .arg(data_dir)
        .spawn()?;
    Ok(())
}
