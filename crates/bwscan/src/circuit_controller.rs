//! Circuit Controller: builds a path into a live circuit and enforces the
//! build timeout. The control-plane connection is itself an actor (see
//! [`crate::control`]); this component only owns the build-then-wait state
//! machine layered on top of it.

use std::sync::Arc;
use std::time::Duration;

use bwscan_core::{CircuitId, Path, ScanError};
use tokio::sync::broadcast;

use crate::control::{CircuitEventStatus, ControlClient, ControlEvent};

/// Tor daemon options the scanner requires for the whole run, applied once
/// at startup. Mirrors the original `scanner.py` `tor_options` dict:
/// learned circuit-build timeouts are disabled in favor of an
/// explicit one, and streams are left unattached so the Attacher can place
/// them deliberately.
pub struct DaemonOptions {
    pub circuit_build_timeout: Duration,
    pub circuit_idle_timeout: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            circuit_build_timeout: Duration::from_secs(60),
            circuit_idle_timeout: Duration::from_secs(60),
        }
    }
}

pub struct CircuitController<C: ControlClient> {
    control: Arc<C>,
    build_timeout: Duration,
}

impl<C: ControlClient> CircuitController<C> {
    pub fn new(control: Arc<C>, build_timeout: Duration) -> Self {
        Self { control, build_timeout }
    }

    pub async fn configure_daemon(&self, options: &DaemonOptions) -> Result<(), ScanError> {
        self.control.set_conf("__LeaveStreamsUnattached", "1").await?;
        self.control.set_conf("LearnCircuitBuildTimeout", "0").await?;
        self.control
            .set_conf(
                "CircuitBuildTimeout",
                &options.circuit_build_timeout.as_secs().to_string(),
            )
            .await?;
        self.control
            .set_conf(
                "CircuitIdleTimeout",
                &options.circuit_idle_timeout.as_secs().to_string(),
            )
            .await?;
        // Picking the path ourselves only works if the daemon never
        // substitutes guards or microdescriptor-only relays of its own
        // accord, and actually has full descriptors to hand out.
        self.control.set_conf("UseEntryGuards", "0").await?;
        self.control.set_conf("UseMicroDescriptors", "0").await?;
        self.control.set_conf("FetchUselessDescriptors", "1").await?;
        self.control.set_conf("FetchDirInfoEarly", "1").await?;
        self.control.set_conf("FetchDirInfoExtraEarly", "1").await?;
        Ok(())
    }

    /// Extends a new circuit along `path` and waits for it to reach
    /// `BUILT`. On timeout the half-built circuit is closed before
    /// returning [`ScanError::BuildTimeout`].
    pub async fn build(&self, path: &Path) -> Result<CircuitId, ScanError> {
        let mut events = self.control.subscribe_events();
        let fps = path.dollar_fingerprints();

        let id = self
            .control
            .extend_circuit(&fps)
            .await
            .map_err(|e| ScanError::BuildFailure(e.to_string()))?;

        match tokio::time::timeout(self.build_timeout, wait_for_built(&mut events, id)).await {
            Ok(Ok(())) => Ok(id),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let _ = self.control.close_circuit(id).await;
                Err(ScanError::BuildTimeout(self.build_timeout))
            }
        }
    }

    /// Closes a circuit explicitly when the caller knows no further stream
    /// will use it. The circuit controller never closes circuits it didn't
    /// build implicitly; callers decide liveness.
    pub async fn close(&self, id: CircuitId) -> Result<(), ScanError> {
        self.control.close_circuit(id).await
    }
}

async fn wait_for_built(
    events: &mut broadcast::Receiver<ControlEvent>,
    id: CircuitId,
) -> Result<(), ScanError> {
    loop {
        match events.recv().await {
            Ok(ControlEvent::Circuit { id: eid, status, .. }) if eid == id => match status {
                CircuitEventStatus::Built => return Ok(()),
                CircuitEventStatus::Failed => {
                    return Err(ScanError::BuildFailure(format!("circuit {id} failed to build")))
                }
                CircuitEventStatus::Launched | CircuitEventStatus::Extended => continue,
                CircuitEventStatus::Closed => {
                    return Err(ScanError::BuildFailure(format!("circuit {id} closed before build")))
                }
            },
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return Err(ScanError::ControlProtocolError("event stream closed".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fake::FakeControlClient;
    use bwscan_core::Relay;

    fn relay(fp: &str) -> Relay {
        Relay::new(
            fp,
            "r",
            vec!["exit".to_string()].into_iter(),
            1_000,
            "127.0.0.1".parse().unwrap(),
            9001,
        )
    }

    #[tokio::test]
    async fn build_succeeds_on_built_event() {
        let control = FakeControlClient::new();
        let controller = CircuitController::new(control.clone(), Duration::from_secs(5));
        let path = Path::two_hop(relay("A"), relay("B")).unwrap();

        let control2 = control.clone();
        let built = tokio::spawn(async move { controller.build(&path).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = CircuitId::from(1);
        control2.resolve_circuit(id, true, vec!["A".into(), "B".into()]);

        let result = built.await.unwrap();
        assert_eq!(result.unwrap(), id);
    }

    #[tokio::test]
    async fn build_fails_on_failed_event() {
        let control = FakeControlClient::new();
        let controller = CircuitController::new(control.clone(), Duration::from_secs(5));
        let path = Path::two_hop(relay("A"), relay("B")).unwrap();

        let control2 = control.clone();
        let built = tokio::spawn(async move { controller.build(&path).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        control2.resolve_circuit(CircuitId::from(1), false, vec![]);

        let result = built.await.unwrap();
        assert!(matches!(result, Err(ScanError::BuildFailure(_))));
    }

    #[tokio::test]
    async fn build_times_out_and_closes_circuit() {
        let control = FakeControlClient::new();
        let controller = CircuitController::new(control.clone(), Duration::from_millis(20));
        let path = Path::two_hop(relay("A"), relay("B")).unwrap();

        let result = controller.build(&path).await;
        assert!(matches!(result, Err(ScanError::BuildTimeout(_))));
        assert_eq!(control.closed_circuits().await, vec![CircuitId::from(1)]);
    }
}
