//! Logging setup: two rotating JSONL streams, one per concern the rest of
//! the crate tags with `target: "bwscan::scan"` /
//! `target: "bwscan::measurements"` — lifecycle events (scan start/finish,
//! partition-scan start/finish) versus per-fetch outcomes — plus a
//! human-readable console layer gated by `--loglevel`.
//!
//! A [`file_rotate::FileRotate`] writer is wrapped in a
//! `tracing_subscriber` layer per stream, composed under one registry.

use std::fs;
use std::path::{Path, PathBuf};

use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const MAX_SIZE_MB: u64 = 100;
const MAX_FILES: usize = 10;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base path passed via `--logfile`/`BWSCANNER_LOGFILE`. The scan stream
    /// is written here; the measurements stream is written to the sibling
    /// file obtained by inserting `.measurements` before the extension.
    pub logfile: PathBuf,
    pub level: String,
}

fn measurements_sibling(logfile: &Path) -> PathBuf {
    let stem = logfile.file_stem().and_then(|s| s.to_str()).unwrap_or("bwscan");
    let ext = logfile.extension().and_then(|e| e.to_str()).unwrap_or("log");
    logfile.with_file_name(format!("{stem}.measurements.{ext}"))
}

fn make_rotating_writer(path: PathBuf) -> FileRotate<AppendCount> {
    FileRotate::new(
        path,
        AppendCount::new(MAX_FILES),
        ContentLimit::Bytes((MAX_SIZE_MB * 1024 * 1024) as usize),
        Compression::None,
        #[cfg(unix)]
        None,
    )
}

struct RotatingWriter {
    writer: std::sync::Arc<std::sync::Mutex<FileRotate<AppendCount>>>,
}

impl RotatingWriter {
    fn new(rotate: FileRotate<AppendCount>) -> Self {
        Self {
            writer: std::sync::Arc::new(std::sync::Mutex::new(rotate)),
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriterGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard {
            guard: self.writer.lock().unwrap(),
        }
    }
}

struct RotatingWriterGuard<'a> {
    guard: std::sync::MutexGuard<'a, FileRotate<AppendCount>>,
}

impl<'a> std::io::Write for RotatingWriterGuard<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.guard.flush()
    }
}

pub fn init_logging(config: LoggingConfig) -> anyhow::Result<()> {
    if let Some(parent) = config.logfile.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let scan_writer = RotatingWriter::new(make_rotating_writer(config.logfile.clone()));
    let measurements_writer =
        RotatingWriter::new(make_rotating_writer(measurements_sibling(&config.logfile)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_filter(EnvFilter::new(format!("bwscan={}", config.level)));

    let scan_layer = fmt::layer()
        .json()
        .with_writer(scan_writer)
        .with_filter(EnvFilter::new("bwscan::scan=info"));

    let measurements_layer = fmt::layer()
        .json()
        .with_writer(measurements_writer)
        .with_filter(EnvFilter::new("bwscan::measurements=info"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(scan_layer)
        .with(measurements_layer)
        .init();

    tracing::info!(
        logfile = %config.logfile.display(),
        level = %config.level,
        "logging initialized"
    );

    Ok(())
}
