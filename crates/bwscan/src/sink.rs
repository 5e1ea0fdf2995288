//! Buffered, off-thread JSON result sink.
//!
//! An mpsc-driven background task owns the one open file handle at a time,
//! so the orchestrator never blocks on a write. Writes are serialized
//! because the background task is the single consumer of an ordered
//! channel; the `send`/`end_flush` handles observe completion through a
//! `watch` of the highest committed sequence number, rather than by
//! cloning a receiver per call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bwscan_core::ScanError;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};

struct WriteJob {
    path: PathBuf,
    records: Vec<serde_json::Value>,
    seq: u64,
}

/// A handle representing the ordered completion of every write the sink had
/// scheduled at the moment `send`/`end_flush` returned it.
pub struct SinkHandle {
    target_seq: u64,
    committed_rx: watch::Receiver<u64>,
    error: Arc<Mutex<Option<String>>>,
}

impl SinkHandle {
    pub async fn wait(mut self) -> Result<(), ScanError> {
        if *self.committed_rx.borrow() < self.target_seq {
            let _ = self
                .committed_rx
                .wait_for(|committed| *committed >= self.target_seq)
                .await;
        }
        if let Some(msg) = self.error.lock().await.clone() {
            return Err(ScanError::WriteError(msg));
        }
        Ok(())
    }
}

pub struct ResultSink {
    dir: PathBuf,
    chunk_size: usize,
    buffer: Mutex<Vec<serde_json::Value>>,
    total_sent: AtomicU64,
    scheduled_seq: AtomicU64,
    committed_tx: watch::Sender<u64>,
    committed_rx: watch::Receiver<u64>,
    job_tx: Option<mpsc::UnboundedSender<WriteJob>>,
    error: Arc<Mutex<Option<String>>>,
}

impl ResultSink {
    pub fn new(dir: impl Into<PathBuf>, chunk_size: usize) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let (job_tx, job_rx) = mpsc::unbounded_channel::<WriteJob>();
        let (committed_tx, committed_rx) = watch::channel(0u64);
        let error = Arc::new(Mutex::new(None));

        tokio::spawn(writer_task(job_rx, committed_tx.clone(), error.clone()));

        Ok(Self {
            dir,
            chunk_size: chunk_size.max(1),
            buffer: Mutex::new(Vec::new()),
            total_sent: AtomicU64::new(0),
            scheduled_seq: AtomicU64::new(0),
            committed_tx,
            committed_rx,
            job_tx: Some(job_tx),
            error,
        })
    }

    /// Accepts any JSON-serializable record, buffers it, and schedules a
    /// write once the buffer reaches `chunk_size`. Returns a handle for the
    /// ordered completion of all writes scheduled through this sink so far
    /// (not necessarily including this specific record, which may still be
    /// sitting unflushed in the buffer).
    pub async fn send<T: Serialize>(&self, record: T) -> Result<SinkHandle, ScanError> {
        let value = serde_json::to_value(record).map_err(ScanError::Serialization)?;
        self.total_sent.fetch_add(1, Ordering::SeqCst);

        let mut buffer = self.buffer.lock().await;
        buffer.push(value);
        while buffer.len() >= self.chunk_size {
            let chunk: Vec<_> = buffer.drain(0..self.chunk_size).collect();
            self.schedule_write(chunk);
        }
        drop(buffer);

        Ok(self.handle())
    }

    fn schedule_write(&self, records: Vec<serde_json::Value>) {
        let seq = self.scheduled_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(chunk_file_name());
        if let Some(tx) = &self.job_tx {
            if tx.send(WriteJob { path, records, seq }).is_err() {
                tracing::warn!(seq, "result sink writer task is gone, chunk dropped");
            }
        }
    }

    fn handle(&self) -> SinkHandle {
        SinkHandle {
            target_seq: self.scheduled_seq.load(Ordering::SeqCst),
            committed_rx: self.committed_rx.clone(),
            error: self.error.clone(),
        }
    }

    /// Drains the remaining buffer into a final chunk file and waits for
    /// every scheduled write, including this final one, to commit.
    pub async fn end_flush(&self) -> Result<(), ScanError> {
        let mut buffer = self.buffer.lock().await;
        if !buffer.is_empty() {
            let remaining: Vec<_> = buffer.drain(..).collect();
            self.schedule_write(remaining);
        }
        drop(buffer);

        self.handle().wait().await
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::SeqCst)
    }
}

fn chunk_file_name() -> String {
    let now = chrono::Utc::now();
    format!("{}-scan.json", now.format("%Y-%m-%dT%H:%M:%S%.9fZ"))
}

async fn writer_task(
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    committed_tx: watch::Sender<u64>,
    error: Arc<Mutex<Option<String>>>,
) {
    while let Some(job) = jobs.recv().await {
        if let Err(e) = write_chunk(&job.path, &job.records) {
            tracing::error!(path = %job.path.display(), error = %e, "result sink write failed");
            *error.lock().await = Some(e.to_string());
        }
        let _ = committed_tx.send(job.seq);
    }
}

fn write_chunk(path: &PathBuf, records: &[serde_json::Value]) -> std::io::Result<()> {
    use std::io::Write;
    let body = serde_json::to_string(records)?;
    let mut file = std::fs::File::create(path)?;
    file.write_all(body.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scenario_s1_single_chunk_round_trip() {
        let dir = tempdir().unwrap();
        let sink = ResultSink::new(dir.path(), 10).unwrap();
        for k in 0..10 {
            sink.send(serde_json::json!({ "i": k })).await.unwrap();
        }
        sink.end_flush().await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
        for (k, v) in parsed.iter().enumerate() {
            assert_eq!(v["i"], k);
        }
    }

    #[tokio::test]
    async fn scenario_s2_multi_chunk_ordering() {
        let dir = tempdir().unwrap();
        let sink = ResultSink::new(dir.path(), 10).unwrap();
        for k in 0..125 {
            sink.send(serde_json::json!({ "i": k })).await.unwrap();
        }
        sink.end_flush().await.unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 13);

        let mut all = Vec::new();
        for name in &names {
            let contents = std::fs::read_to_string(dir.path().join(name)).unwrap();
            let chunk: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
            all.extend(chunk);
        }
        assert_eq!(all.len(), 125);
        for (k, v) in all.iter().enumerate() {
            assert_eq!(v["i"], k);
        }
    }

    #[tokio::test]
    async fn end_flush_total_equals_sends() {
        let dir = tempdir().unwrap();
        let sink = ResultSink::new(dir.path(), 4).unwrap();
        for k in 0..17 {
            sink.send(serde_json::json!({ "i": k })).await.unwrap();
        }
        sink.end_flush().await.unwrap();

        let mut total = 0usize;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            let chunk: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
            total += chunk.len();
        }
        assert_eq!(total as u64, sink.total_sent());
    }
}
