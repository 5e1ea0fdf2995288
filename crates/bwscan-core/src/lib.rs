//! # bwscan-core
//!
//! Domain types and the error taxonomy shared by every component of the
//! bandwidth scanner: relays and consensus snapshots, paths, circuit
//! lifecycle, and the two record shapes written to the result sink.
//!
//! This crate has no async runtime and no I/O dependency, so it can be
//! pulled in by the aggregator, the CLI, and test harnesses alike without
//! dragging tokio along.

pub mod circuit;
pub mod error;
pub mod path;
pub mod record;
pub mod relay;

pub use circuit::{CircuitId, CircuitState};
pub use error::{Result, ScanError};
pub use path::Path;
pub use record::{DescBandwidth, MeasurementRecord, NsBandwidth, PartitionProbeRecord, ProbeStatus};
pub use relay::{normalize_fingerprint, ConsensusSnapshot, Relay};
