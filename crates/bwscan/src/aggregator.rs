//! Aggregator: combines per-relay stream bandwidth samples across one or
//! more scan directories into the line-format file the network's voting
//! authorities consume.
//!
//! Every chunk file under every scan directory is loaded, samples are
//! grouped by relay fingerprint, a relay's `filt_bw` is the mean of only
//! the samples at or above its own mean (`strm_bw`), and `desc_bw`/`ns_bw`
//! come from a fresh control-plane lookup rather than anything recorded at
//! measurement time — a relay can churn out of the consensus between scan
//! and aggregation.

use std::collections::BTreeMap;
use std::path::Path;

use bwscan_core::ScanError;

use crate::control::ControlClient;
use crate::descriptor::{parse_descriptor_bandwidth, parse_router_status, parse_router_status_nickname};

#[derive(Default, Clone)]
struct RelayAccumulator {
    successes: Vec<u64>,
    failures: usize,
}

/// Loads every `*.json` chunk in every `scan_dirs` entry and groups
/// per-relay stream-bandwidth samples and failure counts. A chunk file that
/// fails to parse is skipped with a logged error (`aggregate.py` does the
/// same rather than aborting the whole run).
fn load_measurements(scan_dirs: &[impl AsRef<Path>]) -> BTreeMap<String, RelayAccumulator> {
    let mut by_relay: BTreeMap<String, RelayAccumulator> = BTreeMap::new();

    for dir in scan_dirs {
        let entries = match std::fs::read_dir(dir.as_ref()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.as_ref().display(), error = %e, "could not read scan directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "could not read chunk file");
                    continue;
                }
            };
            let records: Vec<serde_json::Value> = match serde_json::from_str(&contents) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "error reading JSON measurement file");
                    continue;
                }
            };
            for record in records {
                let Some(path_array) = record.get("path").and_then(|p| p.as_array()) else {
                    continue;
                };
                let is_failure = record.get("failure").is_some();
                let circ_bw = record.get("circ_bw").and_then(|v| v.as_u64());
                for fp in path_array {
                    let Some(fp) = fp.as_str() else { continue };
                    let acc = by_relay.entry(fp.to_string()).or_default();
                    if is_failure {
                        acc.failures += 1;
                    } else if let Some(bw) = circ_bw {
                        acc.successes.push(bw);
                    }
                }
            }
        }
    }

    by_relay
}

/// One computed output line, the per-relay line minus formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateLine {
    pub node_id: String,
    pub nick: String,
    pub strm_bw: u64,
    pub filt_bw: u64,
    pub circ_fail_rate: f64,
    pub desc_bw: u64,
    pub ns_bw: u64,
}

impl std::fmt::Display for AggregateLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "node_id={} nick={} strm_bw={} filt_bw={} circ_fail_rate={} desc_bw={} ns_bw={}",
            self.node_id, self.nick, self.strm_bw, self.filt_bw, self.circ_fail_rate, self.desc_bw, self.ns_bw
        )
    }
}

/// `strm_bw = floor(mean(samples))`; `filt_bw = floor(mean(samples >=
/// strm_bw))`. Returns `None` if no sample remains or `filt_bw <= 0`.
fn strm_and_filt_bw(samples: &[u64]) -> Option<(u64, u64)> {
    if samples.is_empty() {
        return None;
    }
    let strm_bw = samples.iter().sum::<u64>() / samples.len() as u64;
    let filtered: Vec<u64> = samples.iter().copied().filter(|&bw| bw >= strm_bw).collect();
    if filtered.is_empty() {
        return None;
    }
    let filt_bw = filtered.iter().sum::<u64>() / filtered.len() as u64;
    if filt_bw == 0 {
        return None;
    }
    Some((strm_bw, filt_bw))
}

/// `failures / (failures + successes)` once the combined count exceeds 5;
/// otherwise 0.
fn circ_fail_rate(successes: usize, failures: usize) -> f64 {
    let total = successes + failures;
    if total <= 5 {
        return 0.0;
    }
    failures as f64 / total as f64
}

/// Runs the full aggregation over `scan_dirs`, querying `control` for each
/// surviving relay's fresh consensus/descriptor bandwidth. A relay no
/// longer present in the consensus is dropped, matching `aggregate.py`'s
/// `TorProtocolError` handling around the `GETINFO` calls.
pub async fn aggregate<C: ControlClient>(
    control: &C,
    scan_dirs: &[impl AsRef<Path>],
) -> Result<Vec<AggregateLine>, ScanError> {
    let by_relay = load_measurements(scan_dirs);
    let mut lines = Vec::new();

    for (fp, acc) in by_relay {
        let Some((strm_bw, filt_bw)) = strm_and_filt_bw(&acc.successes) else {
            continue;
        };
        let bare_fp = bwscan_core::normalize_fingerprint(&fp);

        let ns_body = match control.get_info(&format!("ns/id/{bare_fp}")).await {
            Ok(body) => body,
            Err(_) => continue,
        };
        let desc_body = match control.get_info(&format!("desc/id/{bare_fp}")).await {
            Ok(body) => body,
            Err(_) => continue,
        };

        let Ok((ns_bw, _unmeasured)) = parse_router_status(&ns_body) else {
            continue;
        };
        let Ok((desc_bw, _burst, _observed)) = parse_descriptor_bandwidth(&desc_body) else {
            continue;
        };
        let nick = parse_router_status_nickname(&ns_body).unwrap_or_else(|| "Unnamed".to_string());

        lines.push(AggregateLine {
            node_id: format!("${bare_fp}"),
            nick,
            strm_bw,
            filt_bw,
            circ_fail_rate: circ_fail_rate(acc.successes.len(), acc.failures),
            desc_bw,
            ns_bw,
        });
    }

    Ok(lines)
}

/// Renders the two-line preamble (slice number "0", oldest scan timestamp)
/// followed by one line per relay in the aggregate file layout.
pub fn render(oldest_scan_timestamp: &str, lines: &[AggregateLine]) -> String {
    let mut out = String::new();
    out.push_str("0\n");
    out.push_str(oldest_scan_timestamp);
    out.push('\n');
    for line in lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fake::FakeControlClient;
    use tempfile::tempdir;

    fn write_chunk(dir: &Path, name: &str, records: serde_json::Value) {
        std::fs::write(dir.join(name), serde_json::to_string(&records).unwrap()).unwrap();
    }

    #[test]
    fn strm_and_filt_bw_matches_mean_of_above_average() {
        let samples = vec![100, 200, 300];
        let (strm, filt) = strm_and_filt_bw(&samples).unwrap();
        assert_eq!(strm, 200);
        assert_eq!(filt, 250);
    }

    #[test]
    fn zero_filt_bw_drops_the_relay() {
        assert_eq!(strm_and_filt_bw(&[0, 0, 0]), None);
    }

    #[test]
    fn circ_fail_rate_needs_more_than_five_samples() {
        assert_eq!(circ_fail_rate(2, 2), 0.0);
        assert_eq!(circ_fail_rate(4, 3), 3.0 / 7.0);
    }

    #[tokio::test]
    async fn aggregates_across_chunk_files_and_drops_unknown_relays() {
        let dir = tempdir().unwrap();
        write_chunk(
            dir.path(),
            "a-scan.json",
            serde_json::json!([
                { "path": ["$AAAA"], "circ_bw": 1000, "time_start": 0.0, "time_end": 1.0 },
                { "path": ["$AAAA"], "circ_bw": 2000, "time_start": 0.0, "time_end": 1.0 },
                { "path": ["$ZZZZ"], "failure": "timeout", "time_start": 0.0, "time_end": 1.0 },
            ]),
        );

        let control = FakeControlClient::new();
        control
            .set_info(
                "ns/id/AAAA",
                "r example AAAA AAAA 2024-01-01 00:00:00 1.2.3.4 9001 0\nw Bandwidth=1500",
            )
            .await;
        control
            .set_info("desc/id/AAAA", "router example 1.2.3.4 9001 0 0\nbandwidth 1000 2000 1500\n")
            .await;
        // ZZZZ deliberately has no info registered, simulating a relay that
        // has since left the consensus.

        let dirs = vec![dir.path().to_path_buf()];
        let lines = aggregate(control.as_ref(), &dirs).await.unwrap();

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].node_id, "$AAAA");
        assert_eq!(lines[0].strm_bw, 1500);
        assert_eq!(lines[0].filt_bw, 2000);
        assert_eq!(lines[0].ns_bw, 1500);
        assert_eq!(lines[0].desc_bw, 1000);
    }

    #[test]
    fn render_produces_two_line_preamble() {
        let lines = vec![AggregateLine {
            node_id: "$AAAA".into(),
            nick: "example".into(),
            strm_bw: 100,
            filt_bw: 150,
            circ_fail_rate: 0.0,
            desc_bw: 200,
            ns_bw: 120,
        }];
        let rendered = render("1700000000", &lines);
        let mut out_lines = rendered.lines();
        assert_eq!(out_lines.next(), Some("0"));
        assert_eq!(out_lines.next(), Some("1700000000"));
        assert!(out_lines.next().unwrap().starts_with("node_id=$AAAA"));
    }
}
