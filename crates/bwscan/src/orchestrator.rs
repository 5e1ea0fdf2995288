//! Measurement Orchestrator: a cooperative, concurrency-bounded pipeline
//! driving circuit construction, stream attachment, HTTP download, timeout
//! enforcement, result recording, and graceful shutdown.
//!
//! `measurement.py`'s `BwScan.run_scan` gates in-flight fetches behind a
//! `DeferredSemaphore`, paces circuit launches with a `callLater` loop, and
//! awaits a `DeferredList` over every submitted task before the final
//! flush. The equivalent task graph here replaces the deferred chain: each
//! fetch is a `tokio::spawn`ed task holding an owned
//! [`tokio::sync::Semaphore`] permit, released on completion (success,
//! error, or timeout) before its record reaches the sink.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bwscan_core::{ConsensusSnapshot, MeasurementRecord, Path, Relay, ScanError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Semaphore;

use crate::attacher::Attacher;
use crate::circuit_controller::{CircuitController, DaemonOptions};
use crate::config::ScanConfig;
use crate::control::ControlClient;
use crate::descriptor::{parse_descriptor_bandwidth, parse_router_status};
use crate::fetch::{self, choose_file_size};
use crate::path::two_hop::TwoHopGenerator;
use crate::sink::ResultSink;

/// Drives one or more scans to completion against a consensus snapshot.
/// Exclusively owns the active path generator and the result sink for the
/// duration of a scan; components it drives (the Attacher, the Circuit
/// Controller) are handed in constructed, since they are shared with the
/// control-plane client's lifetime rather than a single scan's.
pub struct MeasurementOrchestrator<C: ControlClient> {
    control: Arc<C>,
    attacher: Arc<Attacher>,
    circuit_controller: CircuitController<C>,
    config: ScanConfig,
}

impl<C: ControlClient + 'static> MeasurementOrchestrator<C> {
    pub fn new(control: Arc<C>, attacher: Arc<Attacher>, config: ScanConfig) -> Self {
        let circuit_controller =
            CircuitController::new(control.clone(), config.circuit_build_timeout());
        Self {
            control,
            attacher,
            circuit_controller,
            config,
        }
    }

    /// Applies the daemon options fixed for the lifetime of the scanning
    /// process. Idempotent; callers invoke this once at startup.
    pub async fn configure_daemon(&self) -> Result<(), ScanError> {
        let options = DaemonOptions {
            circuit_build_timeout: self.config.circuit_build_timeout(),
            circuit_idle_timeout: self.config.circuit_idle_timeout(),
        };
        self.circuit_controller.configure_daemon(&options).await
    }

    /// Runs exactly one scan to completion: builds a fresh Measurement path
    /// generator over `snapshot`, drives it to exhaustion under the
    /// concurrency gate, flushes the sink, and renames the scan directory.
    /// Returns the finished (non-`.running`) directory path.
    pub async fn run_scan(&self, snapshot: &ConsensusSnapshot) -> Result<std::path::PathBuf, ScanError> {
        let epoch_seconds = now_epoch_seconds();
        let running_dir =
            crate::util::scan_dir::start_scan_dir(&self.config.data_dir, epoch_seconds)
                .map_err(ScanError::Io)?;
        tracing::info!(
            target: "bwscan::scan",
            epoch_seconds,
            relays = snapshot.relays.len(),
            dir = %running_dir.display(),
            "scan started"
        );
        let sink = Arc::new(
            ResultSink::new(&running_dir, default_chunk_size()).map_err(ScanError::Io)?,
        );

        let rng = StdRng::seed_from_u64(epoch_seconds);
        let generator = TwoHopGenerator::new(
            snapshot,
            self.config.partitions,
            self.config.this_partition,
            self.config.slice_width,
            rng,
        );

        let gate = Arc::new(Semaphore::new(self.config.request_limit));
        let mut tasks = Vec::new();

        for (probe, exit) in generator {
            let Some(path) = Path::two_hop(probe, exit) else {
                continue;
            };

            let permit = gate
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed during a scan");

            let control = self.control.clone();
            let attacher = self.attacher.clone();
            let build_timeout = self.config.circuit_build_timeout();
            let request_timeout = self.config.request_timeout();
            let payload_host = self.config.payload_host.clone();
            let payload_port = self.config.payload_port;
            let sink = sink.clone();

            tasks.push(tokio::spawn(async move {
                let controller = CircuitController::new(control.clone(), build_timeout);
                let record = fetch_one(
                    &control,
                    &controller,
                    &attacher,
                    &path,
                    request_timeout,
                    &payload_host,
                    payload_port,
                )
                .await;
                drop(permit);
                log_outcome(&record);
                let _ = sink.send(record).await;
            }));

            tokio::time::sleep(self.config.circuit_launch_delay()).await;
        }

        for task in tasks {
            let _ = task.await;
        }

        sink.end_flush().await?;
        let finished = crate::util::scan_dir::finish_scan_dir(&running_dir).map_err(ScanError::Io)?;
        tracing::info!(target: "bwscan::scan", dir = %finished.display(), "scan finished");
        Ok(finished)
    }

    /// Runs scans back to back while `scan_continuous` is configured;
    /// otherwise runs exactly one and returns its directory.
    pub async fn run(&self, snapshot: &ConsensusSnapshot) -> Result<std::path::PathBuf, ScanError> {
        loop {
            let finished = self.run_scan(snapshot).await?;
            if !self.config.scan_continuous {
                return Ok(finished);
            }
        }
    }
}

/// Per-fetch sequence: choose size/URL, build the circuit, attach the
/// download, drain the body under a deadline spanning the whole operation,
/// and assemble a success or failure record. Errors never propagate past
/// this function; the orchestrator always gets a record.
async fn fetch_one<C: ControlClient>(
    control: &Arc<C>,
    controller: &CircuitController<C>,
    attacher: &Attacher,
    path: &Path,
    request_timeout: Duration,
    payload_host: &str,
    payload_port: u16,
) -> MeasurementRecord {
    let time_start = now_secs_f64();
    let avg_bw = path.mean_bandwidth();
    let file = choose_file_size(avg_bw);

    // `run_download` reports the circuit id on this channel the instant
    // `controller.build` succeeds, before awaiting anything else, so a
    // circuit is never orphaned when the outer timeout cancels the download
    // future mid-flight — the send has already landed by then.
    let (circuit_tx, mut circuit_rx) = tokio::sync::oneshot::channel();

    let outcome = tokio::time::timeout(
        request_timeout,
        run_download(
            control,
            controller,
            attacher,
            path,
            payload_host,
            payload_port,
            file,
            circuit_tx,
        ),
    )
    .await;

    let time_end = now_secs_f64();
    let dollar_path = path.dollar_fingerprints();

    match outcome {
        Err(_) => {
            if let Ok(id) = circuit_rx.try_recv() {
                let _ = controller.close(id).await;
            }
            MeasurementRecord::Failure {
                time_start,
                time_end,
                path: dollar_path,
                failure: ScanError::RequestTimeout(request_timeout).short(),
            }
        }
        Ok(Err((e, circuit_id))) => {
            if let Some(id) = circuit_id {
                let _ = controller.close(id).await;
            }
            MeasurementRecord::Failure {
                time_start,
                time_end,
                path: dollar_path,
                failure: e.short(),
            }
        }
        Ok(Ok((bytes_read, circuit_id))) => {
            let _ = controller.close(circuit_id).await;
            let duration_secs = time_end - time_start;
            if bytes_read != file.size {
                return MeasurementRecord::Failure {
                    time_start,
                    time_end,
                    path: dollar_path,
                    failure: ScanError::DownloadIncomplete {
                        expected: file.size as usize,
                        got: bytes_read as usize,
                    }
                    .short(),
                };
            }
            let circ_bw = if duration_secs > 0.0 {
                (bytes_read as f64 / duration_secs).floor() as u64
            } else {
                bytes_read
            };

            let (path_bws, path_ns_bws, path_desc_bws) =
                enrich_hops(control, path.hops()).await;

            MeasurementRecord::Success {
                time_start,
                time_end,
                circ_bw,
                path: dollar_path,
                path_bws,
                path_ns_bws,
                path_desc_bws,
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_download<C: ControlClient>(
    control: &Arc<C>,
    controller: &CircuitController<C>,
    attacher: &Attacher,
    path: &Path,
    payload_host: &str,
    payload_port: u16,
    file: &fetch::BwFile,
    circuit_tx: tokio::sync::oneshot::Sender<bwscan_core::CircuitId>,
) -> Result<(u64, bwscan_core::CircuitId), (ScanError, Option<bwscan_core::CircuitId>)> {
    let circuit_id = controller.build(path).await.map_err(|e| (e, None))?;
    let _ = circuit_tx.send(circuit_id);

    let socks_port = fetch::discover_socks_port(control.as_ref())
        .await
        .map_err(|e| (e, Some(circuit_id)))?;

    let result = fetch::fetch(
        control.as_ref(),
        attacher,
        circuit_id,
        socks_port,
        payload_host,
        payload_port,
        file,
    )
    .await;

    match result {
        Ok(outcome) => Ok((outcome.bytes_read, circuit_id)),
        Err(e) => Err((e, Some(circuit_id))),
    }
}

/// Per-hop enrichment: fetches each hop's consensus and
/// descriptor bandwidth from the control plane. A hop whose lookup fails
/// contributes a zeroed entry rather than failing the whole record — the
/// download itself already succeeded by the time this runs.
async fn enrich_hops<C: ControlClient>(
    control: &Arc<C>,
    hops: &[Relay],
) -> (Vec<u64>, Vec<bwscan_core::NsBandwidth>, Vec<bwscan_core::DescBandwidth>) {
    let mut path_bws = Vec::with_capacity(hops.len());
    let mut path_ns_bws = Vec::with_capacity(hops.len());
    let mut path_desc_bws = Vec::with_capacity(hops.len());

    for relay in hops {
        path_bws.push(relay.bandwidth);

        let ns = control
            .get_info(&format!("ns/id/{}", relay.fingerprint))
            .await
            .ok()
            .and_then(|body| parse_router_status(&body).ok())
            .unwrap_or((relay.bandwidth, false));
        path_ns_bws.push(ns);

        let desc = control
            .get_info(&format!("desc/id/{}", relay.fingerprint))
            .await
            .ok()
            .and_then(|body| parse_descriptor_bandwidth(&body).ok())
            .unwrap_or((0, 0, 0));
        path_desc_bws.push(desc);
    }

    (path_bws, path_ns_bws, path_desc_bws)
}

fn log_outcome(record: &MeasurementRecord) {
    let path = record.path().join(",");
    match record {
        MeasurementRecord::Success { circ_bw, .. } => {
            tracing::info!(target: "bwscan::measurements", path = %path, circ_bw, "measurement complete");
        }
        MeasurementRecord::Failure { failure, .. } => {
            tracing::warn!(target: "bwscan::measurements", path = %path, failure = %failure, "measurement failed");
        }
    }
}

fn default_chunk_size() -> usize {
    10
}

fn now_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after 1970")
        .as_secs()
}

fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after 1970")
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fake::FakeControlClient;
    use std::net::IpAddr;

    fn relay(fp: &str, bw: u64, exit: bool) -> Relay {
        let flags: Vec<&str> = if exit { vec!["exit"] } else { vec![] };
        Relay::new(
            fp,
            "r",
            flags.into_iter(),
            bw,
            "127.0.0.1".parse::<IpAddr>().unwrap(),
            9001,
        )
    }

    fn snapshot() -> ConsensusSnapshot {
        ConsensusSnapshot::new(vec![
            relay("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", 1000, false),
            relay("BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB", 1000, true),
        ])
    }

    #[tokio::test]
    async fn scan_with_no_responding_daemon_still_flushes_failure_records() {
        let control = FakeControlClient::new();
        let attacher = Attacher::spawn(control.clone());
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScanConfig::minimal();
        config.data_dir = dir.path().to_string_lossy().into_owned();
        config.request_timeout_secs = 1;
        config.circuit_launch_delay_ms = 0;

        let orchestrator = MeasurementOrchestrator::new(control, attacher, config);
        let finished = orchestrator.run_scan(&snapshot()).await.unwrap();
        assert!(finished.exists());
        assert!(!finished.to_string_lossy().ends_with(".running"));

        let mut total_records = 0usize;
        for entry in std::fs::read_dir(&finished).unwrap() {
            let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            let records: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
            total_records += records.len();
        }
        assert_eq!(total_records, 1);
    }

    /// A built circuit whose download hangs past the request deadline must
    /// still be closed — the circuit id must survive cancellation of the
    /// `run_download` future inside `tokio::time::timeout`.
    #[tokio::test]
    async fn timed_out_download_still_closes_its_circuit() {
        let control = FakeControlClient::new();
        let attacher = Attacher::spawn(control.clone());
        let controller = CircuitController::new(control.clone(), Duration::from_secs(5));
        let path = Path::two_hop(
            relay("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", 1000, false),
            relay("BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB", 1000, true),
        )
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socks_port = listener.local_addr().unwrap().port();
        control.set_conf("SocksPort", &socks_port.to_string()).await.unwrap();

        // Accept the SOCKS connection and then never reply, so the
        // handshake hangs until the caller's deadline fires.
        tokio::spawn(async move {
            let (_socket, _addr) = listener.accept().await.unwrap();
            std::future::pending::<()>().await
        });

        let control2 = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            control2.resolve_circuit(
                CircuitId::from(1),
                true,
                vec![
                    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
                    "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB".into(),
                ],
            );
        });

        let record = fetch_one(
            &control,
            &controller,
            &attacher,
            &path,
            Duration::from_millis(100),
            "127.0.0.1",
            9,
        )
        .await;

        assert!(matches!(record, MeasurementRecord::Failure { .. }));
        assert_eq!(control.closed_circuits().await, vec![CircuitId::from(1)]);
    }
}
