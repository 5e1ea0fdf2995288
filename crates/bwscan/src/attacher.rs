//! Attacher: matches SOCKS streams the fetcher opens to the circuit the
//! orchestrator built for them.
//!
//! A circuit carries no information about which stream will use it until
//! the stream actually appears as a `STREAM NEW` control event, and the
//! event carries no circuit id. The orchestrator bridges the two by
//! registering the *local* endpoint of the SOCKS connection it is about to
//! open (`ip:port`, its own ephemeral port) against a circuit id before
//! issuing the request; this task watches the event broadcast and issues
//! `ATTACHSTREAM` the moment a `NEW` stream reports that same
//! `SOURCE_ADDR`. The destination is deliberately not the correlation key:
//! concurrent fetches routinely share a destination (the same payload
//! server) but never share a local port.
//!
//! State lives behind a `Mutex` touched only inside this task and by the
//! registration calls, never held across an I/O await.

use std::collections::HashMap;
use std::sync::Arc;

use bwscan_core::CircuitId;
use tokio::sync::Mutex;

use crate::control::{ControlClient, ControlEvent, StreamEventStatus};

pub struct Attacher {
    pending: Mutex<HashMap<String, CircuitId>>,
}

impl Attacher {
    /// Spawns the background event-matching task and returns a handle to
    /// register expected streams against.
    pub fn spawn<C: ControlClient + 'static>(control: Arc<C>) -> Arc<Self> {
        let this = Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
        });
        let worker = this.clone();
        tokio::spawn(async move { worker.run(control).await });
        this
    }

    /// Reserves `local_addr` (the `ip:port` the caller is about to bind and
    /// connect through, as it will appear in the daemon's `STREAM NEW`
    /// event's `SOURCE_ADDR`) for `circuit_id`. Must be called before the
    /// stream is opened.
    pub async fn expect_stream(&self, local_addr: impl Into<String>, circuit_id: CircuitId) {
        self.pending.lock().await.insert(local_addr.into(), circuit_id);
    }

    /// Cancels a reservation that was never claimed (e.g. the fetch failed
    /// before the stream opened).
    pub async fn forget(&self, local_addr: &str) {
        self.pending.lock().await.remove(local_addr);
    }

    async fn run<C: ControlClient>(&self, control: Arc<C>) {
        let mut events = control.subscribe_events();
        loop {
            match events.recv().await {
                Ok(ControlEvent::Stream {
                    id,
                    status: StreamEventStatus::New,
                    source_addr: Some(source_addr),
                    ..
                }) => {
                    let circuit_id = self.pending.lock().await.remove(&source_addr);
                    if let Some(circuit_id) = circuit_id {
                        if let Err(e) = control.attach_stream(id, circuit_id).await {
                            tracing::warn!(stream = id, %circuit_id, error = %e, "stream attach failed");
                        }
                    }
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fake::FakeControlClient;
    use std::time::Duration;

    #[tokio::test]
    async fn attaches_matching_stream_to_reserved_circuit() {
        let control = FakeControlClient::new();
        let attacher = Attacher::spawn(control.clone());

        let circuit_id = CircuitId::from(7);
        attacher.expect_stream("127.0.0.1:54321", circuit_id).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        control.resolve_stream(42, true, None, "example.invalid:443", "127.0.0.1:54321");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(attacher.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn forget_cancels_reservation() {
        let control = FakeControlClient::new();
        let attacher = Attacher::spawn(control.clone());

        attacher.expect_stream("127.0.0.1:54321", CircuitId::from(1)).await;
        attacher.forget("127.0.0.1:54321").await;
        assert!(attacher.pending.lock().await.is_empty());
    }
}
