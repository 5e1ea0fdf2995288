//! Line-protocol actor over a real Tor control port.
//!
//! One task owns the `TcpStream`: a single-owner socket actor, the same
//! shape as any other socket-owning actor elsewhere in this codebase.
//! Requests are strictly synchronous (the control protocol allows at most
//! one outstanding command), so the actor multiplexes a single in-flight
//! `oneshot` reply slot against unsolicited `650` event lines.

use std::path::PathBuf;

use async_trait::async_trait;
use bwscan_core::{CircuitId, ScanError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::{CircuitEventStatus, ControlClient, ControlEvent, StreamEventStatus};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

pub enum TorAuth {
    Null,
    Password(String),
    SafeCookie(PathBuf),
}

struct Command {
    line: String,
    respond_to: oneshot::Sender<Result<Reply, ScanError>>,
}

struct Reply {
    code: String,
    lines: Vec<String>,
}

pub struct TorControlClient {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<ControlEvent>,
}

impl TorControlClient {
    pub async fn connect(addr: impl ToSocketAddrs, auth: TorAuth) -> Result<Self, ScanError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ScanError::ControlProtocolError(format!("connect failed: {e}")))?;
        let (read_half, write_half) = stream.into_split();

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(control_actor(
            BufReader::new(read_half),
            write_half,
            cmd_rx,
            events_tx.clone(),
        ));

        let client = Self { cmd_tx, events_tx };
        client.authenticate(auth).await?;
        client.set_events(&["CIRC", "STREAM", "NEWCONSENSUS"]).await?;
        Ok(client)
    }

    async fn authenticate(&self, auth: TorAuth) -> Result<(), ScanError> {
        let line = match auth {
            TorAuth::Null => "AUTHENTICATE".to_string(),
            TorAuth::Password(pw) => format!("AUTHENTICATE \"{}\"", pw.replace('"', "\\\"")),
            TorAuth::SafeCookie(path) => {
                let cookie = std::fs::read(&path).map_err(ScanError::Io)?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
        };
        self.command(line).await.map(|_| ())
    }

    async fn set_events(&self, events: &[&str]) -> Result<(), ScanError> {
        self.command(format!("SETEVENTS {}", events.join(" ")))
            .await
            .map(|_| ())
    }

    async fn command(&self, line: String) -> Result<Reply, ScanError> {
        let (respond_to, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command { line, respond_to })
            .await
            .map_err(|_| ScanError::ControlProtocolError("control actor is gone".into()))?;
        rx.await
            .map_err(|_| ScanError::ControlProtocolError("control actor dropped reply".into()))?
    }
}

#[async_trait]
impl ControlClient for TorControlClient {
    async fn set_conf(&self, key: &str, value: &str) -> Result<(), ScanError> {
        self.command(format!("SETCONF {key}={value}")).await?;
        Ok(())
    }

    async fn get_conf(&self, key: &str) -> Result<String, ScanError> {
        let reply = self.command(format!("GETCONF {key}")).await?;
        let line = reply
            .lines
            .first()
            .ok_or_else(|| ScanError::ControlProtocolError("empty GETCONF reply".into()))?;
        Ok(line.split_once('=').map(|(_, v)| v).unwrap_or("").to_string())
    }

    async fn get_info(&self, key: &str) -> Result<String, ScanError> {
        let reply = self.command(format!("GETINFO {key}")).await?;
        parse_info_value(key, &reply.lines)
    }

    async fn extend_circuit(&self, path: &[String]) -> Result<CircuitId, ScanError> {
        let joined = path.join(",");
        let reply = self.command(format!("EXTENDCIRCUIT 0 {joined}")).await?;
        let line = reply
            .lines
            .first()
            .ok_or_else(|| ScanError::ControlProtocolError("empty EXTENDCIRCUIT reply".into()))?;
        let id_str = line
            .strip_prefix("EXTENDED ")
            .ok_or_else(|| ScanError::ControlProtocolError(format!("unexpected reply: {line}")))?;
        let id: u64 = id_str
            .trim()
            .parse()
            .map_err(|_| ScanError::ControlProtocolError(format!("bad circuit id: {id_str}")))?;
        Ok(CircuitId::from(id))
    }

    async fn attach_stream(&self, stream_id: u64, circuit_id: CircuitId) -> Result<(), ScanError> {
        self.command(format!("ATTACHSTREAM {stream_id} {circuit_id}"))
            .await?;
        Ok(())
    }

    async fn close_circuit(&self, circuit_id: CircuitId) -> Result<(), ScanError> {
        self.command(format!("CLOSECIRCUIT {circuit_id}")).await?;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ControlEvent> {
        self.events_tx.subscribe()
    }
}

fn parse_info_value(key: &str, lines: &[String]) -> Result<String, ScanError> {
    let prefix = format!("{key}=");
    let mut out = Vec::new();
    let mut in_value = false;
    for line in lines {
        if let Some(rest) = line.strip_prefix(&prefix) {
            out.push(rest.to_string());
            in_value = true;
        } else if in_value {
            out.push(line.clone());
        }
    }
    if out.is_empty() {
        return Err(ScanError::DescriptorUnavailable(key.to_string()));
    }
    Ok(out.join("\n"))
}

async fn control_actor(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut cmd_rx: mpsc::Receiver<Command>,
    events_tx: broadcast::Sender<ControlEvent>,
) {
    let mut pending: Option<oneshot::Sender<Result<Reply, ScanError>>> = None;
    let mut line_buf = String::new();

    loop {
        tokio::select! {
            biased;

            read_result = read_line(&mut reader, &mut line_buf) => {
                match read_result {
                    Ok(false) => break,
                    Ok(true) => {
                        let first = line_buf.trim_end().to_string();
                        match collect_block(&mut reader, first).await {
                            Ok(block) if block.code.starts_with('6') => {
                                if let Some(event) = parse_event(&block) {
                                    let _ = events_tx.send(event);
                                }
                            }
                            Ok(block) => {
                                if let Some(sender) = pending.take() {
                                    let result = if block.code.starts_with('2') {
                                        Ok(block)
                                    } else {
                                        Err(ScanError::ControlProtocolError(block.lines.join("; ")))
                                    };
                                    let _ = sender.send(result);
                                }
                            }
                            Err(e) => {
                                if let Some(sender) = pending.take() {
                                    let _ = sender.send(Err(e));
                                }
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        if let Some(sender) = pending.take() {
                            let _ = sender.send(Err(e));
                        }
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv(), if pending.is_none() => {
                match cmd {
                    Some(Command { line, respond_to }) => {
                        if writer.write_all(line.as_bytes()).await.is_err()
                            || writer.write_all(b"\r\n").await.is_err()
                        {
                            let _ = respond_to.send(Err(ScanError::ControlProtocolError(
                                "write to control port failed".into(),
                            )));
                            break;
                        }
                        pending = Some(respond_to);
                    }
                    None => break,
                }
            }
        }
    }
}

async fn read_line(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    buf: &mut String,
) -> Result<bool, ScanError> {
    buf.clear();
    let n = reader
        .read_line(buf)
        .await
        .map_err(|e| ScanError::ControlProtocolError(format!("read failed: {e}")))?;
    Ok(n > 0)
}

/// Reads the remainder of a multi-line reply/event block starting from its
/// first line. `250-`/`650-` introduce continuation lines; `250+`/`650+`
/// introduce a data block terminated by a lone `.` line; `250 `/`650 `
/// terminates the block immediately.
async fn collect_block(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    first_line: String,
) -> Result<Reply, ScanError> {
    let code = first_line.get(0..3).unwrap_or("").to_string();
    let sep = first_line.chars().nth(3);
    let mut lines = vec![first_line[4.min(first_line.len())..].to_string()];

    let mut sep = sep;
    loop {
        match sep {
            Some(' ') | None => break,
            Some('-') => {
                let mut buf = String::new();
                if !read_line(reader, &mut buf).await? {
                    break;
                }
                let line = buf.trim_end().to_string();
                sep = line.chars().nth(3);
                lines.push(line.get(4.min(line.len())..).unwrap_or("").to_string());
            }
            Some('+') => {
                loop {
                    let mut buf = String::new();
                    if !read_line(reader, &mut buf).await? {
                        break;
                    }
                    let data_line = buf.trim_end().to_string();
                    if data_line == "." {
                        break;
                    }
                    lines.push(data_line);
                }
                let mut buf = String::new();
                if !read_line(reader, &mut buf).await? {
                    break;
                }
                let line = buf.trim_end().to_string();
                sep = line.chars().nth(3);
            }
            Some(_) => break,
        }
    }

    Ok(Reply { code, lines })
}

fn parse_event(reply: &Reply) -> Option<ControlEvent> {
    let first = reply.lines.first()?;
    let mut parts = first.split_whitespace();
    match parts.next()? {
        "CIRC" => {
            let id: u64 = parts.next()?.parse().ok()?;
            let status = match parts.next()? {
                "LAUNCHED" => CircuitEventStatus::Launched,
                "EXTENDED" => CircuitEventStatus::Extended,
                "BUILT" => CircuitEventStatus::Built,
                "FAILED" | "CLOSED" if first.contains("REASON") => CircuitEventStatus::Failed,
                "CLOSED" => CircuitEventStatus::Closed,
                _ => CircuitEventStatus::Failed,
            };
            let path = parts
                .next()
                .map(|p| p.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            Some(ControlEvent::Circuit {
                id: CircuitId::from(id),
                status,
                path,
            })
        }
        "STREAM" => {
            let id: u64 = parts.next()?.parse().ok()?;
            let status = match parts.next()? {
                "NEW" | "NEWRESOLVE" => StreamEventStatus::New,
                "SENTCONNECT" => StreamEventStatus::SentConnect,
                "SUCCEEDED" => StreamEventStatus::Succeeded,
                "FAILED" => StreamEventStatus::Failed,
                "CLOSED" => StreamEventStatus::Closed,
                _ => StreamEventStatus::Failed,
            };
            let circ_str = parts.next()?;
            let circuit_id = circ_str.parse::<u64>().ok().filter(|v| *v != 0).map(CircuitId::from);
            let target = parts.next().unwrap_or("").to_string();
            let mut source_addr = None;
            for field in parts {
                if let Some(value) = field.strip_prefix("SOURCE_ADDR=") {
                    source_addr = Some(value.to_string());
                }
            }
            Some(ControlEvent::Stream {
                id,
                status,
                circuit_id,
                target,
                source_addr,
            })
        }
        "NEWCONSENSUS" => Some(ControlEvent::NewConsensus),
        _ => None,
    }
}
