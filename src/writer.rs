//! Async Writer: append-only newline-delimited JSON per stream, with
//! size-based rotation.
//!
//! Disk I/O runs on `tokio::task::spawn_blocking`, the parent directory is
//! created eagerly, and a single-writer queue drives all appends for a
//! stream so records are never reordered.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::error::PersistenceError;

type WriteResult = Result<(), PersistenceError>;

struct WriteRequest {
    line: String,
    reply: oneshot::Sender<WriteResult>,
}

/// Handle to a single stream's append-only writer task.
pub struct AsyncWriter {
    stream_name: String,
    tx: mpsc::Sender<WriteRequest>,
    active_file: Arc<parking_lot::Mutex<String>>,
    current_size: Arc<AtomicU64>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl AsyncWriter {
    /// Spawn the writer task for one stream. `rotation_bytes` is the size
    /// threshold at which a new file is opened.
    pub fn spawn(data_dir: PathBuf, stream_name: &str, rotation_bytes: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(&data_dir)?;

        let (tx, mut rx) = mpsc::channel::<WriteRequest>(4096);
        let active_file = Arc::new(parking_lot::Mutex::new(String::new()));
        let current_size = Arc::new(AtomicU64::new(0));

        let stream_name_owned = stream_name.to_string();
        let active_file_task = active_file.clone();
        let current_size_task = current_size.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut file = match open_new_file(&data_dir, &stream_name_owned) {
                Ok((f, path, _)) => {
                    *active_file_task.lock() = path;
                    f
                }
                Err(e) => {
                    tracing::error!("failed to open initial {} file: {}", stream_name_owned, e);
                    // Drain the channel, failing every request, so producers
                    // awaiting the durability future don't hang forever.
                    while let Some(req) = rx.blocking_recv() {
                        let _ = req.reply.send(Err(PersistenceError::AppendFailed {
                            stream: stream_name_owned.clone(),
                            reason: e.to_string(),
                        }));
                    }
                    return;
                }
            };

            while let Some(req) = rx.blocking_recv() {
                let result = (|| -> std::io::Result<()> {
                    file.write_all(req.line.as_bytes())?;
                    file.write_all(b"\n")?;
                    file.flush()?;
                    Ok(())
                })();

                match result {
                    Ok(()) => {
                        let new_size = current_size_task
                            .fetch_add(req.line.len() as u64 + 1, Ordering::SeqCst)
                            + req.line.len() as u64
                            + 1;
                        let _ = req.reply.send(Ok(()));

                        if new_size >= rotation_bytes {
                            match open_new_file(&data_dir, &stream_name_owned) {
                                Ok((f, path, _)) => {
                                    file = f;
                                    *active_file_task.lock() = path;
                                    current_size_task.store(0, Ordering::SeqCst);
                                }
                                Err(e) => {
                                    tracing::error!(
                                        "failed to rotate {} stream: {}",
                                        stream_name_owned,
                                        e
                                    );
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = req.reply.send(Err(PersistenceError::AppendFailed {
                            stream: stream_name_owned.clone(),
                            reason: e.to_string(),
                        }));
                    }
                }
            }
        });

        Ok(Self {
            stream_name: stream_name.to_string(),
            tx,
            active_file,
            current_size,
            task: Some(task),
        })
    }

    /// Append one record. Resolves once the record is durable at least to
    /// the OS buffer.
    pub async fn append(&self, line: String) -> WriteResult {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriteRequest { line, reply })
            .await
            .map_err(|_| PersistenceError::AppendFailed {
                stream: self.stream_name.clone(),
                reason: "writer task is gone".into(),
            })?;
        rx.await.map_err(|_| PersistenceError::AppendFailed {
            stream: self.stream_name.clone(),
            reason: "writer task dropped the reply channel".into(),
        })?
    }

    pub fn active_file(&self) -> String {
        self.active_file.lock().clone()
    }

    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::SeqCst)
    }

    /// Drain the queue and flush, bounded by `grace`.
    pub async fn close(mut self, grace: std::time::Duration) {
        drop(self.tx);
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(grace, task).await;
        }
    }
}

fn open_new_file(
    data_dir: &Path,
    stream_name: &str,
) -> std::io::Result<(std::fs::File, String, PathBuf)> {
    let ts = Utc::now().format("%Y%m%d-%H%M%S");
    // Disambiguate rotations that land within the same second so a fast
    // rotation burst never silently reopens (and appends to) a prior file.
    let mut suffix = 0u32;
    loop {
        let filename = if suffix == 0 {
            format!("{}-{}.jsonl", stream_name, ts)
        } else {
            format!("{}-{}-{}.jsonl", stream_name, ts, suffix)
        };
        let path = data_dir.join(&filename);
        if !path.exists() {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            return Ok((file, filename, path));
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_are_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AsyncWriter::spawn(dir.path().to_path_buf(), "events", 128 * 1024 * 1024)
            .unwrap();

        for i in 0..10 {
            writer.append(format!("{{\"seq\":{}}}", i)).await.unwrap();
        }

        let active = writer.active_file();
        writer.close(std::time::Duration::from_secs(1)).await;

        let contents = std::fs::read_to_string(dir.path().join(active)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 10);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(*line, format!("{{\"seq\":{}}}", i));
        }
    }

    #[tokio::test]
    async fn rotates_when_size_threshold_crossed() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny threshold forces rotation after the first line.
        let writer = AsyncWriter::spawn(dir.path().to_path_buf(), "events", 8).unwrap();

        writer.append("x".repeat(20)).await.unwrap();
        let first_file = writer.active_file();
        writer.append("y".repeat(20)).await.unwrap();
        let second_file = writer.active_file();

        writer.close(std::time::Duration::from_secs(1)).await;
        assert_ne!(first_file, second_file);
    }
}
