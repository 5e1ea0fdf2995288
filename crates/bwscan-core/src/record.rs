use serde::{Deserialize, Serialize};

/// A network-status bandwidth reading: `(bandwidth, is_unmeasured)`.
pub type NsBandwidth = (u64, bool);

/// A server-descriptor bandwidth triple: `(average, burst, observed)`.
pub type DescBandwidth = (u64, u64, u64);

/// One measurement outcome, written to the result sink as a single JSON
/// object. Exactly one of the two shapes is ever produced for a given
/// fetch; `circ_bw` and `failure` are mutually exclusive by construction
/// (spec invariant: exactly one of `circ_bw` or `failure` is present).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementRecord {
    Success {
        time_start: f64,
        time_end: f64,
        /// Bytes per second. Fixed unit across this crate and the
        /// aggregator; never milliseconds.
        circ_bw: u64,
        /// `$`-prefixed fingerprints, hop order.
        path: Vec<String>,
        path_bws: Vec<u64>,
        path_ns_bws: Vec<NsBandwidth>,
        path_desc_bws: Vec<DescBandwidth>,
    },
    Failure {
        time_start: f64,
        time_end: f64,
        path: Vec<String>,
        failure: String,
    },
}

impl MeasurementRecord {
    pub fn is_success(&self) -> bool {
        matches!(self, MeasurementRecord::Success { .. })
    }

    pub fn path(&self) -> &[String] {
        match self {
            MeasurementRecord::Success { path, .. } => path,
            MeasurementRecord::Failure { path, .. } => path,
        }
    }

    pub fn circ_bw(&self) -> Option<u64> {
        match self {
            MeasurementRecord::Success { circ_bw, .. } => Some(*circ_bw),
            MeasurementRecord::Failure { .. } => None,
        }
    }
}

/// Outcome of a connectivity/partition probe circuit build. Success is
/// intentionally not written (counters only, to keep logs bounded); only
/// `timeout` and `failure` produce a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Timeout,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionProbeRecord {
    pub time_start: f64,
    pub time_end: f64,
    /// Rendered as `"A -> B"` using the pair's `$`-prefixed fingerprints.
    pub path: String,
    pub status: ProbeStatus,
}

impl PartitionProbeRecord {
    pub fn new(time_start: f64, time_end: f64, a: &str, b: &str, status: ProbeStatus) -> Self {
        Self {
            time_start,
            time_end,
            path: format!("{a} -> {b}"),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_round_trips_and_keeps_shape() {
        let record = MeasurementRecord::Success {
            time_start: 1.0,
            time_end: 2.0,
            circ_bw: 12345,
            path: vec!["$AAAA".into(), "$BBBB".into()],
            path_bws: vec![100, 200],
            path_ns_bws: vec![(100, false), (200, true)],
            path_desc_bws: vec![(100, 150, 90), (200, 250, 190)],
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"circ_bw\":12345"));
        assert!(!json.contains("\"failure\""));
        let back: MeasurementRecord = serde_json::from_str(&json).unwrap();
        assert!(back.is_success());
    }

    #[test]
    fn failure_has_no_circ_bw_field() {
        let record = MeasurementRecord::Failure {
            time_start: 1.0,
            time_end: 1.5,
            path: vec!["$AAAA".into(), "$BBBB".into()],
            failure: "timeout".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("circ_bw"));
        assert!(json.contains("\"failure\":\"timeout\""));
    }

    #[test]
    fn probe_record_formats_pair() {
        let record = PartitionProbeRecord::new(0.0, 1.0, "$AAAA", "$BBBB", ProbeStatus::Timeout);
        assert_eq!(record.path, "$AAAA -> $BBBB");
    }
}
