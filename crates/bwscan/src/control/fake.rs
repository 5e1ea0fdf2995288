//! In-memory [`ControlClient`] for exercising the Attacher, Circuit
//! Controller, Measurement Orchestrator and Aggregator without a Tor
//! daemon. Tests drive it by calling [`FakeControlClient::resolve_circuit`]
//! / [`FakeControlClient::resolve_stream`] to emit the events a real daemon
//! would send asynchronously.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bwscan_core::{CircuitId, ScanError};
use tokio::sync::{broadcast, Mutex};

use super::{CircuitEventStatus, ControlClient, ControlEvent, StreamEventStatus};

#[derive(Default)]
struct State {
    conf: HashMap<String, String>,
    info: HashMap<String, String>,
    circuits: HashMap<CircuitId, Vec<String>>,
    closed: Vec<CircuitId>,
}

pub struct FakeControlClient {
    state: Mutex<State>,
    next_circuit_id: AtomicU64,
    events_tx: broadcast::Sender<ControlEvent>,
}

impl FakeControlClient {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            state: Mutex::new(State::default()),
            next_circuit_id: AtomicU64::new(1),
            events_tx,
        })
    }

    pub async fn set_info(&self, key: &str, value: &str) {
        self.state.lock().await.info.insert(key.to_string(), value.to_string());
    }

    pub async fn conf_value(&self, key: &str) -> Option<String> {
        self.state.lock().await.conf.get(key).cloned()
    }

    pub async fn path_for(&self, circuit_id: CircuitId) -> Option<Vec<String>> {
        self.state.lock().await.circuits.get(&circuit_id).cloned()
    }

    pub async fn closed_circuits(&self) -> Vec<CircuitId> {
        self.state.lock().await.closed.clone()
    }

    /// Emits a `BUILT` or `FAILED` circuit event for a circuit previously
    /// created through [`ControlClient::extend_circuit`].
    pub fn resolve_circuit(&self, id: CircuitId, built: bool, path: Vec<String>) {
        let status = if built {
            CircuitEventStatus::Built
        } else {
            CircuitEventStatus::Failed
        };
        let _ = self.events_tx.send(ControlEvent::Circuit { id, status, path });
    }

    /// Emits the `NEW` event a real daemon sends as soon as a stream opens,
    /// followed immediately by the `SUCCEEDED`/`FAILED` outcome. Tests that
    /// only care about attachment can ignore the second event; the Attacher
    /// itself reacts only to `NEW`, correlating by `source_addr` exactly as
    /// it would against a real daemon.
    pub fn resolve_stream(
        &self,
        id: u64,
        succeeded: bool,
        circuit_id: Option<CircuitId>,
        target: &str,
        source_addr: &str,
    ) {
        let _ = self.events_tx.send(ControlEvent::Stream {
            id,
            status: StreamEventStatus::New,
            circuit_id,
            target: target.to_string(),
            source_addr: Some(source_addr.to_string()),
        });
        let status = if succeeded {
            StreamEventStatus::Succeeded
        } else {
            StreamEventStatus::Failed
        };
        let _ = self.events_tx.send(ControlEvent::Stream {
            id,
            status,
            circuit_id,
            target: target.to_string(),
            source_addr: Some(source_addr.to_string()),
        });
    }
}

#[async_trait]
impl ControlClient for FakeControlClient {
    async fn set_conf(&self, key: &str, value: &str) -> Result<(), ScanError> {
        self.state.lock().await.conf.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_conf(&self, key: &str) -> Result<String, ScanError> {
        self.state
            .lock()
            .await
            .conf
            .get(key)
            .cloned()
            .ok_or_else(|| ScanError::ControlProtocolError(format!("no such conf key: {key}")))
    }

    async fn get_info(&self, key: &str) -> Result<String, ScanError> {
        self.state
            .lock()
            .await
            .info
            .get(key)
            .cloned()
            .ok_or_else(|| ScanError::DescriptorUnavailable(key.to_string()))
    }

    async fn extend_circuit(&self, path: &[String]) -> Result<CircuitId, ScanError> {
        let id = CircuitId::from(self.next_circuit_id.fetch_add(1, Ordering::SeqCst));
        self.state.lock().await.circuits.insert(id, path.to_vec());
        Ok(id)
    }

    async fn attach_stream(&self, _stream_id: u64, _circuit_id: CircuitId) -> Result<(), ScanError> {
        Ok(())
    }

    async fn close_circuit(&self, circuit_id: CircuitId) -> Result<(), ScanError> {
        self.state.lock().await.closed.push(circuit_id);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ControlEvent> {
        self.events_tx.subscribe()
    }
}
