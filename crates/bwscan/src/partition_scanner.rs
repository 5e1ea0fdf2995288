//! Partition Scanner: the same scheduler shape as the Measurement
//! Orchestrator, but the work unit is a circuit build with no download,
//! driven over the Permuted-pair generator instead of the Measurement
//! generator. Used to detect relay-pairs that cannot route to each other
//! (a network partition), not to measure throughput.
//!
//! Mirrors `partition_scan.py`'s `ProbeAll2HopCircuits`: success is
//! deliberately not written to keep logs bounded, only counted; `timeout`
//! and `failure` each produce a record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bwscan_core::{Path, PartitionProbeRecord, ProbeStatus, Relay, ScanError};
use tokio::sync::Semaphore;

use crate::circuit_controller::CircuitController;
use crate::config::ScanConfig;
use crate::control::ControlClient;
use crate::crypto::derive_seed;
use crate::path::permuted::PermutedPairGenerator;
use crate::sink::ResultSink;

/// Counters exposed to an optional metrics HTTP endpoint.
#[derive(Default)]
pub struct ProbeCounters {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
}

impl ProbeCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
            self.timeouts.load(Ordering::Relaxed),
        )
    }
}

pub struct PartitionScanner<C: ControlClient> {
    control: Arc<C>,
    config: ScanConfig,
    counters: Arc<ProbeCounters>,
}

impl<C: ControlClient + 'static> PartitionScanner<C> {
    pub fn new(control: Arc<C>, config: ScanConfig) -> Self {
        Self {
            control,
            config,
            counters: Arc::new(ProbeCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<ProbeCounters> {
        self.counters.clone()
    }

    /// Runs one full pass of the permuted-pair generator for this scanner's
    /// partition, probing each pair with a build-only circuit. `relays` is
    /// the full, un-partitioned relay set (every cooperating scanner
    /// derives the same shuffle from it); `shared_secret` is the
    /// out-of-band value every cooperating scanner shares.
    pub async fn run_scan(
        &self,
        relays: &[Relay],
        consensus_digest_input: &str,
        shared_secret: &[u8],
    ) -> Result<std::path::PathBuf, ScanError> {
        let epoch_seconds = now_epoch_seconds();
        let running_dir =
            crate::util::scan_dir::start_scan_dir(&self.config.data_dir, epoch_seconds)
                .map_err(ScanError::Io)?;
        tracing::info!(target: "bwscan::scan", epoch_seconds, relays = relays.len(), "partition scan started");
        let sink = Arc::new(
            ResultSink::new(&running_dir, default_chunk_size()).map_err(ScanError::Io)?,
        );

        let seed = derive_seed(consensus_digest_input, shared_secret);
        let generator = PermutedPairGenerator::new(
            relays,
            self.config.partitions,
            self.config.this_partition.saturating_sub(1),
            seed,
        );

        let gate = Arc::new(Semaphore::new(self.config.request_limit));
        let mut tasks = Vec::new();

        for (a, b) in generator {
            let Some(path) = Path::two_hop(a, b) else {
                continue;
            };

            let permit = gate
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed during a scan");

            let control = self.control.clone();
            let build_timeout = self.config.circuit_build_timeout();
            let sink = sink.clone();
            let counters = self.counters.clone();

            tasks.push(tokio::spawn(async move {
                let controller = CircuitController::new(control, build_timeout);
                let outcome = probe_one(&controller, &path).await;
                drop(permit);
                if let Some(record) = outcome {
                    counters.failures.fetch_add(
                        matches!(record.status, ProbeStatus::Failure) as u64,
                        Ordering::Relaxed,
                    );
                    counters.timeouts.fetch_add(
                        matches!(record.status, ProbeStatus::Timeout) as u64,
                        Ordering::Relaxed,
                    );
                    let _ = sink.send(record).await;
                } else {
                    counters.successes.fetch_add(1, Ordering::Relaxed);
                }
            }));

            tokio::time::sleep(self.config.circuit_launch_delay()).await;
        }

        for task in tasks {
            let _ = task.await;
        }

        sink.end_flush().await?;
        let finished = crate::util::scan_dir::finish_scan_dir(&running_dir).map_err(ScanError::Io)?;
        tracing::info!(target: "bwscan::scan", dir = %finished.display(), "partition scan finished");
        Ok(finished)
    }
}

/// Builds a circuit along `path` and closes it immediately; returns `None`
/// on success (counted, not recorded) or `Some(record)` on timeout/failure.
async fn probe_one<C: ControlClient>(
    controller: &CircuitController<C>,
    path: &Path,
) -> Option<PartitionProbeRecord> {
    let time_start = now_secs_f64();
    let fps = path.dollar_fingerprints();
    let (a, b) = (fps[0].as_str(), fps[1].as_str());

    match controller.build(path).await {
        Ok(id) => {
            let _ = controller.close(id).await;
            None
        }
        Err(ScanError::BuildTimeout(_)) => {
            let time_end = now_secs_f64();
            tracing::warn!(target: "bwscan::measurements", %a, %b, "partition probe timed out");
            Some(PartitionProbeRecord::new(
                time_start,
                time_end,
                a,
                b,
                ProbeStatus::Timeout,
            ))
        }
        Err(e) => {
            let time_end = now_secs_f64();
            tracing::warn!(target: "bwscan::measurements", %a, %b, error = %e, "partition probe failed");
            Some(PartitionProbeRecord::new(
                time_start,
                time_end,
                a,
                b,
                ProbeStatus::Failure,
            ))
        }
    }
}

fn default_chunk_size() -> usize {
    1000
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

    fn relay(fp: &str) -> Relay {
        Relay::new(
            fp,
            "r",
            std::iter::empty::<String>(),
            1000,
            "127.0.0.1".parse::<IpAddr>().unwrap(),
            9001,
        )
    }

    #[tokio::test]
    async fn unresolved_builds_time_out_and_are_recorded() {
        let control = FakeControlClient::new();
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScanConfig::minimal();
        config.data_dir = dir.path().to_string_lossy().into_owned();
        config.circuit_build_timeout_secs = 1;
        config.circuit_launch_delay_ms = 0;
        config.request_limit = 4;

        let relays = vec![
            relay("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            relay("BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB"),
        ];

        let scanner = PartitionScanner::new(control, config);
        let finished = scanner
            .run_scan(&relays, "A,B,", b"shared secret")
            .await
            .unwrap();
        assert!(finished.exists());

        let (successes, failures, timeouts) = scanner.counters().snapshot();
        assert_eq!(successes, 0);
        assert_eq!(failures, 0);
        assert_eq!(timeouts, 2);
    }
}
