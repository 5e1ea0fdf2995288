use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single routing node in the anonymity network, as declared by the
/// current consensus.
///
/// `fingerprint` is normalized at construction: an optional leading `$` is
/// stripped and the hex digits are uppercased. This is the one
/// normalization point in the crate; every other component reads
/// `fingerprint` assuming it is already bare, uppercase, 40 hex digits, and
/// reconstructs the `$`-prefixed form only where the wire format demands it
/// (measurement records, the aggregator's `node_id=` field).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relay {
    pub fingerprint: String,
    pub nickname: String,
    pub flags: BTreeSet<String>,
    /// Consensus-declared bandwidth, bytes/second.
    pub bandwidth: u64,
    pub ip: std::net::IpAddr,
    pub or_port: u16,
}

impl Relay {
    pub fn new(
        fingerprint: impl AsRef<str>,
        nickname: impl Into<String>,
        flags: impl IntoIterator<Item = impl Into<String>>,
        bandwidth: u64,
        ip: std::net::IpAddr,
        or_port: u16,
    ) -> Self {
        Self {
            fingerprint: normalize_fingerprint(fingerprint.as_ref()),
            nickname: nickname.into(),
            flags: flags.into_iter().map(Into::into).collect(),
            bandwidth,
            ip,
            or_port,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Whether this relay may appear in the exit position of a path: it
    /// carries the "exit" flag and neither "badexit" nor "authority".
    pub fn is_valid_exit(&self) -> bool {
        self.has_flag("exit") && !self.has_flag("badexit") && !self.has_flag("authority")
    }

    /// The `$`-prefixed form used on the wire in measurement records and
    /// the aggregate file.
    pub fn dollar_fingerprint(&self) -> String {
        format!("${}", self.fingerprint)
    }
}

/// Strip an optional leading `$` and uppercase the remaining hex digits.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.trim_start_matches('$').to_uppercase()
}

/// An immutable snapshot of the set of currently participating relays, plus
/// whatever consensus-wide parameters the daemon reported alongside them.
/// Taken once per scan and never mutated afterward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub relays: Vec<Relay>,
    #[serde(default)]
    pub bandwidth_weights: Option<std::collections::BTreeMap<String, i64>>,
    #[serde(default)]
    pub params: std::collections::BTreeMap<String, i64>,
}

impl ConsensusSnapshot {
    pub fn new(relays: Vec<Relay>) -> Self {
        Self {
            relays,
            bandwidth_weights: None,
            params: Default::default(),
        }
    }

    pub fn find(&self, fingerprint: &str) -> Option<&Relay> {
        let needle = normalize_fingerprint(fingerprint);
        self.relays.iter().find(|r| r.fingerprint == needle)
    }

    pub fn exits(&self) -> Vec<&Relay> {
        self.relays.iter().filter(|r| r.is_valid_exit()).collect()
    }

    /// SHA-256 of the comma-joined uppercase fingerprints, trailing comma
    /// included, as used by the keyed-PRNG seed derivation.
    pub fn fingerprint_digest_input(&self) -> String {
        let mut joined = String::new();
        for relay in &self.relays {
            joined.push_str(&relay.fingerprint);
            joined.push(',');
        }
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(fp: &str, bw: u64, flags: &[&str]) -> Relay {
        Relay::new(
            fp,
            "r",
            flags.iter().map(|f| f.to_string()),
            bw,
            "127.0.0.1".parse().unwrap(),
            9001,
        )
    }

    #[test]
    fn normalizes_dollar_prefix_and_case() {
        let r = relay("$abc123", 1, &[]);
        assert_eq!(r.fingerprint, "ABC123");
        assert_eq!(r.dollar_fingerprint(), "$ABC123");
    }

    #[test]
    fn valid_exit_predicate() {
        assert!(relay("a", 1, &["exit"]).is_valid_exit());
        assert!(!relay("a", 1, &["exit", "badexit"]).is_valid_exit());
        assert!(!relay("a", 1, &["exit", "authority"]).is_valid_exit());
        assert!(!relay("a", 1, &[]).is_valid_exit());
    }

    #[test]
    fn snapshot_find_normalizes_query() {
        let snap = ConsensusSnapshot::new(vec![relay("ABCDEF", 1, &["exit"])]);
        assert!(snap.find("$abcdef").is_some());
        assert!(snap.find("ABCDEF").is_some());
        assert!(snap.find("zzzzzz").is_none());
    }
}
