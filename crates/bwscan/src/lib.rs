//! # bwscan
//!
//! A Tor relay bandwidth scanner: generates two-hop circuit paths across the
//! current consensus, measures achieved throughput by downloading a
//! calibrated payload over each circuit, and aggregates the resulting
//! samples into the vote-weight line format the directory authorities
//! consume.
//!
//! A companion partition scanner walks the same relay set pairwise and
//! records which pairs fail to build a circuit at all, surfacing
//! connectivity partitions the bandwidth measurement itself wouldn't catch.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bwscan::config::ScanConfig;
//! use bwscan::control::tor::{TorAuth, TorControlClient};
//! use bwscan::orchestrator::MeasurementOrchestrator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::from_file("bwscan.toml")?;
//!     let control = Arc::new(TorControlClient::connect("127.0.0.1:9051", TorAuth::Null).await?);
//!     let attacher = bwscan::attacher::Attacher::spawn(control.clone());
//!     let orchestrator = MeasurementOrchestrator::new(control, attacher, config);
//!     orchestrator.configure_daemon().await?;
//!     // orchestrator.run(&snapshot).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `cli`: enables the `bwscan` binary (`scan`/`list`/`aggregate` subcommands).

pub mod aggregator;
pub mod attacher;
pub mod circuit_controller;
pub mod config;
pub mod consensus;
pub mod control;
pub mod crypto;
pub mod descriptor;
pub mod fetch;
pub mod orchestrator;
pub mod partition_scanner;
pub mod path;
pub mod sink;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use bwscan_core::{CircuitId, CircuitState, ConsensusSnapshot, MeasurementRecord, Path, Relay, ScanError};
