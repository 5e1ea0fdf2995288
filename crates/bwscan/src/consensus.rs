//! Consensus snapshot acquisition: issues `GETINFO ns/all` and parses the
//! returned network-status document into a [`ConsensusSnapshot`], sourced
//! fresh from the daemon at scan start.
//!
//! The document is a sequence of per-relay blocks, each starting with an
//! `r` line; extends [`crate::descriptor`]'s single-block line parsing
//! (`w Bandwidth=…`) across the whole multi-relay reply rather than
//! introducing a second parsing vocabulary.

use std::net::IpAddr;

use bwscan_core::{ConsensusSnapshot, Relay, ScanError};

use crate::control::ControlClient;

/// Splits a full `ns/all` reply into per-relay blocks (each beginning with
/// an `r ` line) and parses each into a [`Relay`]. Blocks that don't parse
/// (malformed `r` line, unparsable IP/port) are skipped rather than failing
/// the whole snapshot — a single malformed entry shouldn't block a scan.
pub fn parse_consensus(body: &str) -> ConsensusSnapshot {
    let mut relays = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.starts_with("r ") && !current.is_empty() {
            if let Some(relay) = parse_block(&current) {
                relays.push(relay);
            }
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        if let Some(relay) = parse_block(&current) {
            relays.push(relay);
        }
    }

    ConsensusSnapshot::new(relays)
}

/// Decodes an `r` line's identity field — base64 (no padding) of the
/// relay's 20-byte SHA-1 digest — into the bare uppercase hex fingerprint,
/// mirroring `stem`'s `RouterStatusEntryV3.fingerprint` conversion.
fn decode_identity(identity: &str) -> Option<String> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(identity)
        .ok()?;
    Some(hex::encode_upper(bytes))
}

fn parse_block(lines: &[&str]) -> Option<Relay> {
    let r_line = lines.iter().find(|l| l.starts_with("r "))?;
    let mut fields = r_line.strip_prefix("r ")?.split_whitespace();
    let nickname = fields.next()?;
    let identity = fields.next()?;
    let fingerprint = decode_identity(identity)?;
    let _digest = fields.next()?;
    let _date = fields.next()?;
    let _time = fields.next()?;
    let ip: IpAddr = fields.next()?.parse().ok()?;
    let or_port: u16 = fields.next()?.parse().ok()?;

    let flags: Vec<String> = lines
        .iter()
        .find(|l| l.starts_with("s "))
        .map(|l| l.strip_prefix("s ").unwrap_or("").split_whitespace().map(str::to_lowercase).collect())
        .unwrap_or_default();

    let bandwidth = lines
        .iter()
        .find(|l| l.starts_with("w "))
        .and_then(|l| {
            l.strip_prefix("w ")?
                .split_whitespace()
                .find_map(|f| f.strip_prefix("Bandwidth=")?.parse::<u64>().ok())
        })
        .unwrap_or(0);

    Some(Relay::new(fingerprint, nickname, flags, bandwidth, ip, or_port))
}

pub async fn fetch_consensus<C: ControlClient>(control: &C) -> Result<ConsensusSnapshot, ScanError> {
    let body = control.get_info("ns/all").await?;
    Ok(parse_consensus(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Identity fields are base64 (no padding) of a 20-byte digest, matching
    // the real `r` line wire format. "A" * 27 decodes to 20 zero bytes;
    // "/" * 26 + "8" decodes to 20 0xFF bytes.
    const DOC: &str = "r example AAAAAAAAAAAAAAAAAAAAAAAAAAA AAAA 2024-01-01 00:00:00 1.2.3.4 9001 0\ns Exit Fast Running Stable Valid\nw Bandwidth=1234\nr other //////////////////////////8 BBBB 2024-01-01 00:00:00 5.6.7.8 9001 0\ns Fast Running Stable Valid\nw Bandwidth=500\n";

    #[test]
    fn parses_two_relay_blocks() {
        let snapshot = parse_consensus(DOC);
        assert_eq!(snapshot.relays.len(), 2);
        assert_eq!(snapshot.relays[0].nickname, "example");
        assert_eq!(snapshot.relays[0].bandwidth, 1234);
        assert!(snapshot.relays[0].is_valid_exit());
        assert_eq!(snapshot.relays[1].nickname, "other");
        assert!(!snapshot.relays[1].is_valid_exit());
    }

    #[test]
    fn fingerprint_is_decoded_from_base64_identity_field() {
        let snapshot = parse_consensus(DOC);
        assert_eq!(snapshot.relays[0].fingerprint, "0000000000000000000000000000000000000000");
        assert_eq!(snapshot.relays[1].fingerprint, "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF");
    }

    #[test]
    fn malformed_base64_identity_skips_the_block() {
        let doc = "r bad not-valid-base64!! XXXX 2024-01-01 00:00:00 1.2.3.4 9001 0\ns Fast\nw Bandwidth=1\n";
        assert!(parse_consensus(doc).relays.is_empty());
    }

    #[test]
    fn empty_document_yields_empty_snapshot() {
        assert!(parse_consensus("").relays.is_empty());
    }
}
