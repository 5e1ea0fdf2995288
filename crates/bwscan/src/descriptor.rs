//! Router-status and server-descriptor parsing: extracts the handful of
//! fields the orchestrator's per-hop enrichment and the aggregator need out
//! of the two `GETINFO` reply document shapes, rather than pulling in a
//! full consensus-document parser.
//!
//! Field names follow `stem`'s parsed objects:
//! `RouterStatusEntryV3.bandwidth`/`.is_unmeasured` come off the router
//! status's `w Bandwidth=… [Unmeasured=1]` line;
//! `ServerDescriptor.average_bandwidth`/`.burst_bandwidth`/`.observed_bandwidth`
//! come off the descriptor's `bandwidth <avg> <burst> <observed>` line.

use bwscan_core::{DescBandwidth, NsBandwidth, ScanError};

/// Parses a `GETINFO ns/id/<fp>` reply body into `(bandwidth, is_unmeasured)`.
pub fn parse_router_status(body: &str) -> Result<NsBandwidth, ScanError> {
    for line in body.lines() {
        let Some(rest) = line.strip_prefix("w ") else {
            continue;
        };
        let mut bandwidth = None;
        let mut unmeasured = false;
        for field in rest.split_whitespace() {
            if let Some(value) = field.strip_prefix("Bandwidth=") {
                bandwidth = value.parse::<u64>().ok();
            } else if field == "Unmeasured=1" {
                unmeasured = true;
            }
        }
        if let Some(bandwidth) = bandwidth {
            return Ok((bandwidth, unmeasured));
        }
    }
    Err(ScanError::ControlProtocolError(
        "router status reply carries no w Bandwidth= line".into(),
    ))
}

/// Extracts the nickname from a `GETINFO ns/id/<fp>` reply's `r` line
/// (`r <nickname> <identity> <digest> <published> <ip> <or_port> <dir_port>`).
pub fn parse_router_status_nickname(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("r "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

/// Parses a `GETINFO desc/id/<fp>` reply body into `(average, burst,
/// observed)` off its `bandwidth` line.
pub fn parse_descriptor_bandwidth(body: &str) -> Result<DescBandwidth, ScanError> {
    for line in body.lines() {
        let Some(rest) = line.strip_prefix("bandwidth ") else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let average = parts.next().and_then(|v| v.parse::<u64>().ok());
        let burst = parts.next().and_then(|v| v.parse::<u64>().ok());
        let observed = parts.next().and_then(|v| v.parse::<u64>().ok());
        if let (Some(average), Some(burst), Some(observed)) = (average, burst, observed) {
            return Ok((average, burst, observed));
        }
    }
    Err(ScanError::ControlProtocolError(
        "descriptor reply carries no bandwidth line".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS_REPLY: &str = "r example AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA AAAA 2024-01-01 00:00:00 1.2.3.4 9001 0\ns Exit Fast Running Stable Valid\nw Bandwidth=1234\np reject 1-65535";

    const NS_REPLY_UNMEASURED: &str =
        "r example AAAA AAAA 2024-01-01 00:00:00 1.2.3.4 9001 0\nw Bandwidth=500 Unmeasured=1";

    const DESC_REPLY: &str = "router example 1.2.3.4 9001 0 0\nplatform Tor 0.4.8\nbandwidth 1000 2000 1500\n";

    #[test]
    fn parses_router_status_bandwidth() {
        assert_eq!(parse_router_status(NS_REPLY).unwrap(), (1234, false));
    }

    #[test]
    fn parses_router_status_unmeasured_flag() {
        assert_eq!(parse_router_status(NS_REPLY_UNMEASURED).unwrap(), (500, true));
    }

    #[test]
    fn parses_router_status_nickname() {
        assert_eq!(parse_router_status_nickname(NS_REPLY), Some("example".to_string()));
    }

    #[test]
    fn parses_descriptor_triple() {
        assert_eq!(parse_descriptor_bandwidth(DESC_REPLY).unwrap(), (1000, 2000, 1500));
    }

    #[test]
    fn missing_line_is_an_error() {
        assert!(parse_router_status("s Exit").is_err());
        assert!(parse_descriptor_bandwidth("router example 1.2.3.4 9001 0 0").is_err());
    }
}
