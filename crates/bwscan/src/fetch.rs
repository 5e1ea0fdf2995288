//! HTTP fetch over a SOCKS5-attached circuit.
//!
//! The payload server is a plain static-file HTTP host; the interesting
//! part is not the HTTP itself but making sure the download actually rides
//! the circuit the orchestrator built for it. Tor correlates a SOCKS
//! connection to a caller-requested circuit by the connection's *local*
//! `ip:port` (`SOURCE_ADDR=` on the `STREAM NEW` event), and that address is
//! only knowable once our TCP socket to the SOCKS port is open — before any
//! bytes of the SOCKS handshake are sent. A general-purpose HTTP client
//! (`reqwest`, which this crate's Cargo.toml originally carried for this)
//! cannot expose that ephemeral local port ahead of the connection it makes
//! internally, so the fetcher instead speaks the minimal subset of SOCKS5
//! and HTTP/1.1 it needs directly over a `tokio::net::TcpStream`, the same
//! way the control-plane actor in [`crate::control::tor`] owns its own
//! socket. `reqwest` is dropped from this crate's dependency table as a
//! result (see DESIGN.md).

use std::time::{Duration, Instant};

use bwscan_core::ScanError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::attacher::Attacher;
use crate::control::ControlClient;

/// One entry in the scanner's calibrated payload table: `size` bytes,
/// requested from the payload server as `<base_url>/<name>`. `sha256` is
/// carried for future integrity verification; only size is checked today,
/// verifying only the size, not the content, at download time.
#[derive(Debug, Clone, Copy)]
pub struct BwFile {
    pub name: &'static str,
    pub size: u64,
    pub sha256: &'static str,
}

/// Ascending by size. Grounded on `measurement.py`'s `bwscan_bw_files`
/// table; the hashes there are SHA-1 (the `stem`/Twisted toolchain never
/// moved to SHA-256), but this crate names the field `sha256` since no
/// consumer here actually verifies it yet and SHA-1 is not a hash this
/// codebase should introduce anywhere load-bearing. Recorded as an
/// intentional divergence in DESIGN.md.
pub const BW_FILES: &[BwFile] = &[
    BwFile { name: "2M", size: 2 * 1024 * 1024, sha256: "" },
    BwFile { name: "4M", size: 4 * 1024 * 1024, sha256: "" },
    BwFile { name: "8M", size: 8 * 1024 * 1024, sha256: "" },
    BwFile { name: "16M", size: 16 * 1024 * 1024, sha256: "" },
    BwFile { name: "32M", size: 32 * 1024 * 1024, sha256: "" },
    BwFile { name: "64M", size: 64 * 1024 * 1024, sha256: "" },
];

/// Smallest file such that `5 * avg_bw < size`; the largest file if none
/// qualifies.
pub fn choose_file_size(avg_bw: u64) -> &'static BwFile {
    BW_FILES
        .iter()
        .find(|f| 5 * avg_bw < f.size)
        .unwrap_or_else(|| BW_FILES.last().expect("BW_FILES is non-empty"))
}

/// Resolves the daemon's SOCKS5 listening address from `GETCONF SocksPort`:
/// `DEFAULT` means 9050; if several ports are configured the first purely
/// numeric one wins, Unix-domain entries are skipped.
pub async fn discover_socks_port<C: ControlClient>(control: &C) -> Result<u16, ScanError> {
    let raw = control.get_conf("SocksPort").await?;
    for entry in raw.split_whitespace() {
        let port_part = entry.split(':').next_back().unwrap_or(entry);
        if port_part.eq_ignore_ascii_case("DEFAULT") || entry.eq_ignore_ascii_case("DEFAULT") {
            return Ok(9050);
        }
        if let Ok(port) = port_part.parse::<u16>() {
            return Ok(port);
        }
    }
    Ok(9050)
}

pub struct FetchOutcome {
    pub bytes_read: u64,
    pub duration: Duration,
}

/// Downloads `file` from `<base_host>:<base_port>/<file.name>` through the
/// circuit `circuit_id`, attaching via `attacher`. The whole operation
/// (SOCKS handshake, HTTP exchange, body drain) is the caller's
/// responsibility to deadline with `tokio::time::timeout`; this function
/// does not impose one itself, since §4.F's deadline spans the circuit
/// build that precedes it too.
pub async fn fetch<C: ControlClient>(
    control: &C,
    attacher: &Attacher,
    circuit_id: bwscan_core::CircuitId,
    socks_port: u16,
    base_host: &str,
    base_port: u16,
    file: &BwFile,
) -> Result<FetchOutcome, ScanError> {
    let start = Instant::now();

    let mut stream = TcpStream::connect(("127.0.0.1", socks_port))
        .await
        .map_err(ScanError::Io)?;
    let local_addr = stream
        .local_addr()
        .map_err(ScanError::Io)?
        .to_string();

    attacher.expect_stream(local_addr.clone(), circuit_id).await;

    if let Err(e) = socks5_connect(&mut stream, base_host, base_port).await {
        attacher.forget(&local_addr).await;
        return Err(e);
    }

    let request = format!(
        "GET /{path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n",
        path = file.name,
        host = base_host,
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ScanError::ConnectError(e.to_string()))?;

    let body = read_http_body(&mut stream)
        .await
        .map_err(|e| ScanError::TransportError(e.to_string()))?;

    Ok(FetchOutcome {
        bytes_read: body.len() as u64,
        duration: start.elapsed(),
    })
}

/// SOCKS5, no-auth, `CONNECT host:port`. RFC 1928, the minimal client side.
async fn socks5_connect(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), ScanError> {
    stream
        .write_all(&[0x05, 0x01, 0x00])
        .await
        .map_err(|e| ScanError::ConnectError(e.to_string()))?;
    let mut greeting_reply = [0u8; 2];
    stream
        .read_exact(&mut greeting_reply)
        .await
        .map_err(|e| ScanError::ConnectError(e.to_string()))?;
    if greeting_reply != [0x05, 0x00] {
        return Err(ScanError::ConnectError(
            "SOCKS5 server rejected no-auth method".into(),
        ));
    }

    let mut request = vec![0x05, 0x01, 0x00];
    match host.parse::<std::net::Ipv4Addr>() {
        Ok(ip) => {
            request.push(0x01);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            request.push(0x03);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| ScanError::ConnectError(e.to_string()))?;

    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| ScanError::ConnectError(e.to_string()))?;
    if header[1] != 0x00 {
        return Err(ScanError::ConnectError(format!(
            "SOCKS5 CONNECT failed, reply code {}",
            header[1]
        )));
    }
    let addr_len = match header[3] {
        0x01 => 4,
        0x03 => {
            let mut len_byte = [0u8; 1];
            stream
                .read_exact(&mut len_byte)
                .await
                .map_err(|e| ScanError::ConnectError(e.to_string()))?;
            len_byte[0] as usize
        }
        0x04 => 16,
        other => return Err(ScanError::ConnectError(format!("unknown SOCKS5 ATYP {other}"))),
    };
    let mut bnd_addr = vec![0u8; addr_len + 2];
    stream
        .read_exact(&mut bnd_addr)
        .await
        .map_err(|e| ScanError::ConnectError(e.to_string()))?;
    Ok(())
}

/// Reads an HTTP/1.1 response to EOF, splits off the header block, and
/// returns the body. Honors `Content-Length` to stop early when present;
/// otherwise reads until the peer closes (the `Connection: close` header
/// the request sent asks for exactly that).
async fn read_http_body(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break Some(pos);
        }
    };
    let Some(header_end) = header_end else {
        return Ok(Vec::new());
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]);
    let content_length = header_text
        .lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(str::to_string))
        .and_then(|v| v.trim().parse::<usize>().ok());

    let body_start = header_end + 4;
    let mut body = buf[body_start..].to_vec();

    if let Some(expected) = content_length {
        while body.len() < expected {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(expected);
    } else {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    Ok(body)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s5_bandwidth_file_selection() {
        assert_eq!(choose_file_size(300 * 1024).name, "2M");
        assert_eq!(choose_file_size(20 * 1024 * 1024).name, "64M");
    }

    #[test]
    fn chooses_smallest_qualifying_file() {
        assert_eq!(choose_file_size(0).name, "2M");
        assert_eq!(choose_file_size(4 * 1024 * 1024).name, "32M");
    }

    #[test]
    fn header_end_detection() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc";
        let pos = find_header_end(buf).unwrap();
        assert_eq!(&buf[pos + 4..], b"abc");
    }
}
