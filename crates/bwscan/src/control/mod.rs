//! Control-plane client: the thin async boundary between the scanner and a
//! Tor control port. One socket, one background task, a command channel in
//! and an event broadcast out, so callers never hold a lock across an I/O
//! await.

pub mod fake;
pub mod tor;

use async_trait::async_trait;
use bwscan_core::{CircuitId, ScanError};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum ControlEvent {
    Circuit {
        id: CircuitId,
        status: CircuitEventStatus,
        path: Vec<String>,
    },
    Stream {
        id: u64,
        status: StreamEventStatus,
        circuit_id: Option<CircuitId>,
        /// Destination the stream is headed to, as Tor reports it.
        target: String,
        /// The client-side `ip:port` of the SOCKS connection that opened
        /// this stream (`SOURCE_ADDR=` on the wire). This, not the
        /// destination, is what the Attacher correlates against: many
        /// concurrent fetches share a destination (the same payload
        /// server) but never share a local port.
        source_addr: Option<String>,
    },
    NewConsensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEventStatus {
    Launched,
    Extended,
    Built,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventStatus {
    New,
    SentConnect,
    Succeeded,
    Failed,
    Closed,
}

/// Everything the Attacher, Circuit Controller, Measurement Orchestrator and
/// Aggregator need from a running Tor daemon. A single trait keeps those
/// components testable against [`fake::FakeControlClient`] without a real
/// control port.
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn set_conf(&self, key: &str, value: &str) -> Result<(), ScanError>;
    async fn get_conf(&self, key: &str) -> Result<String, ScanError>;
    async fn get_info(&self, key: &str) -> Result<String, ScanError>;

    /// Issues `EXTENDCIRCUIT 0 <path>` and returns the new circuit's id.
    /// The circuit is not yet built; callers wait for a `Built`/`Failed`
    /// [`ControlEvent::Circuit`] to learn the outcome.
    async fn extend_circuit(&self, path: &[String]) -> Result<CircuitId, ScanError>;
    async fn attach_stream(&self, stream_id: u64, circuit_id: CircuitId) -> Result<(), ScanError>;
    async fn close_circuit(&self, circuit_id: CircuitId) -> Result<(), ScanError>;

    fn subscribe_events(&self) -> broadcast::Receiver<ControlEvent>;
}
