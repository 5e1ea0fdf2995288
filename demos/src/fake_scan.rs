//! Demo harness: runs a measurement scan, a partition scan, and an
//! aggregation pass against [`bwscan::control::fake::FakeControlClient`] —
//! no running Tor daemon required. A background task stands in for the
//! daemon's `CIRC`/`STREAM` event stream, resolving every circuit the
//! scanner extends as built (real circuit construction and teardown run
//! end to end); the download itself still fails, since there is no real
//! SOCKS proxy behind the fake control port, which this harness reports as
//! expected rather than treating as an error.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bwscan::aggregator::{aggregate, render};
use bwscan::attacher::Attacher;
use bwscan::config::ScanConfig;
use bwscan::control::fake::FakeControlClient;
use bwscan::orchestrator::MeasurementOrchestrator;
use bwscan::partition_scanner::PartitionScanner;
use bwscan::{CircuitId, ConsensusSnapshot, Relay};

fn relay(fp: &str, bandwidth: u64, exit: bool) -> Relay {
    let flags: Vec<&str> = if exit { vec!["exit", "fast", "running"] } else { vec!["fast", "running"] };
    Relay::new(
        fp,
        format!("relay-{fp}"),
        flags.into_iter(),
        bandwidth,
        "127.0.0.1".parse::<IpAddr>().unwrap(),
        9001,
    )
}

fn demo_snapshot() -> ConsensusSnapshot {
    ConsensusSnapshot::new(vec![
        relay("1111111111111111111111111111111111111111", 5_000_000, false),
        relay("2222222222222222222222222222222222222222", 3_000_000, false),
        relay("3333333333333333333333333333333333333333", 8_000_000, true),
        relay("4444444444444444444444444444444444444444", 2_000_000, true),
    ])
}

/// Stands in for a well-behaved daemon: resolves every circuit it sees
/// extended as successfully built, as soon as it appears.
fn spawn_circuit_resolver(control: Arc<FakeControlClient>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut next_unseen = 1u64;
        for _ in 0..500 {
            while let Some(path) = control.path_for(CircuitId::from(next_unseen)).await {
                control.resolve_circuit(CircuitId::from(next_unseen), true, path);
                next_unseen += 1;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = scratch_data_dir()?;
    let snapshot = demo_snapshot();

    println!("== measurement scan ==");
    let control = FakeControlClient::new();
    let resolver = spawn_circuit_resolver(control.clone());
    let attacher = Attacher::spawn(control.clone());

    let mut config = ScanConfig::minimal();
    config.data_dir = data_dir.clone();
    config.request_timeout_secs = 2;
    config.circuit_launch_delay_ms = 0;
    config.request_limit = 4;

    let orchestrator = MeasurementOrchestrator::new(control.clone(), attacher, config);
    orchestrator.configure_daemon().await?;
    let finished = orchestrator.run_scan(&snapshot).await?;
    println!("scan directory: {}", finished.display());

    let counts = count_records(&finished)?;
    println!("records written: {counts} (downloads fail without a real SOCKS proxy behind the fake control port)");

    println!("\n== partition scan ==");
    let mut partition_config = ScanConfig::minimal();
    partition_config.data_dir = data_dir.clone();
    partition_config.circuit_build_timeout_secs = 2;
    partition_config.circuit_launch_delay_ms = 0;
    partition_config.request_limit = 4;

    let partition_scanner = PartitionScanner::new(control.clone(), partition_config);
    let partition_dir = partition_scanner
        .run_scan(&snapshot.relays, &snapshot.fingerprint_digest_input(), b"demo shared secret")
        .await?;
    let (successes, failures, timeouts) = partition_scanner.counters().snapshot();
    println!("partition scan directory: {}", partition_dir.display());
    println!("successes={successes} failures={failures} timeouts={timeouts}");

    resolver.abort();

    println!("\n== aggregate ==");
    control
        .set_info(
            "ns/id/1111111111111111111111111111111111111111",
            "r relay-1111 1111111111111111111111111111111111111111 AAAA 2024-01-01 00:00:00 127.0.0.1 9001 0\nw Bandwidth=4800000",
        )
        .await;
    control
        .set_info(
            "desc/id/1111111111111111111111111111111111111111",
            "router relay-1111 127.0.0.1 9001 0 0\nbandwidth 4000000 6000000 4500000\n",
        )
        .await;

    let dirs = vec![finished, partition_dir];
    let lines = aggregate(control.as_ref(), &dirs).await?;
    let rendered = render("0", &lines);
    println!("{rendered}");

    Ok(())
}

fn count_records(dir: &std::path::Path) -> anyhow::Result<usize> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let contents = std::fs::read_to_string(entry.path())?;
        let records: Vec<serde_json::Value> = serde_json::from_str(&contents)?;
        total += records.len();
    }
    Ok(total)
}

fn scratch_data_dir() -> anyhow::Result<String> {
    let counter = {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    };
    let dir = std::env::temp_dir().join(format!("bwscan-fake-scan-{}-{counter}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir.to_string_lossy().into_owned())
}
