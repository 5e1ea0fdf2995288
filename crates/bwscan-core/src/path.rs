use crate::relay::Relay;

/// An ordered sequence of relays a circuit is built along.
///
/// A path is valid iff all relays are distinct and the last relay satisfies
/// [`Relay::is_valid_exit`]. Two-hop paths are used for measurement and
/// partition probing; three-hop paths for exit scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(Vec<Relay>);

impl Path {
    /// Build a path, checking the distinctness and valid-exit invariants.
    /// Returns `None` if either invariant is violated.
    pub fn new(hops: Vec<Relay>) -> Option<Self> {
        if hops.len() < 2 {
            return None;
        }
        let mut seen = std::collections::HashSet::new();
        for hop in &hops {
            if !seen.insert(&hop.fingerprint) {
                return None;
            }
        }
        if !hops.last().unwrap().is_valid_exit() {
            return None;
        }
        Some(Self(hops))
    }

    pub fn two_hop(probe: Relay, exit: Relay) -> Option<Self> {
        Self::new(vec![probe, exit])
    }

    pub fn hops(&self) -> &[Relay] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mean consensus-declared bandwidth across all hops, used by the
    /// download-size policy.
    pub fn mean_bandwidth(&self) -> u64 {
        let sum: u64 = self.0.iter().map(|r| r.bandwidth).sum();
        sum / self.0.len() as u64
    }

    /// `$`-prefixed fingerprints in hop order, as they appear in a
    /// measurement record.
    pub fn dollar_fingerprints(&self) -> Vec<String> {
        self.0.iter().map(Relay::dollar_fingerprint).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn rejects_duplicate_hops() {
        let a = relay("AAAA", 10, true);
        let b = a.clone();
        assert!(Path::two_hop(a, b).is_none());
    }

    #[test]
    fn rejects_non_exit_last_hop() {
        let probe = relay("AAAA", 10, false);
        let not_exit = relay("BBBB", 10, false);
        assert!(Path::two_hop(probe, not_exit).is_none());
    }

    #[test]
    fn accepts_valid_two_hop() {
        let probe = relay("AAAA", 10, false);
        let exit = relay("BBBB", 20, true);
        let path = Path::two_hop(probe, exit).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.mean_bandwidth(), 15);
        assert_eq!(path.dollar_fingerprints(), vec!["$AAAA", "$BBBB"]);
    }
}
