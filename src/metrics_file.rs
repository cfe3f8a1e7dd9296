//! Writes the current metrics snapshot to `metrics.json`, best-effort,
//! rewritten after each successful append to a data stream.
//!
//! Atomic tempfile-then-persist writes run on a blocking thread so a
//! partially written file is never observable to a concurrent reader.

use std::path::PathBuf;

use crate::error::PersistenceError;
use crate::types::MetricsSnapshot;

pub struct MetricsFileWriter {
    path: PathBuf,
}

impl MetricsFileWriter {
    pub fn new(data_dir: &std::path::Path) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(data_dir).map_err(|e| PersistenceError::MetricsWriteFailed(e.to_string()))?;
        Ok(Self {
            path: data_dir.join("metrics.json"),
        })
    }

    pub async fn write(&self, snapshot: &MetricsSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| PersistenceError::MetricsWriteFailed(e.to_string()))?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), PersistenceError> {
            use std::io::Write;

            let parent = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(parent)
                .map_err(|e| PersistenceError::MetricsWriteFailed(e.to_string()))?;
            tmp.write_all(json.as_bytes())
                .map_err(|e| PersistenceError::MetricsWriteFailed(e.to_string()))?;
            tmp.flush()
                .map_err(|e| PersistenceError::MetricsWriteFailed(e.to_string()))?;
            tmp.persist(&path)
                .map_err(|e| PersistenceError::MetricsWriteFailed(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| PersistenceError::MetricsWriteFailed(format!("blocking task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> MetricsSnapshot {
        MetricsSnapshot {
            reasoning_depth_avg: 1.5,
            reasoning_depth_p95: 3.0,
            debate_breadth_avg: 2.0,
            task_success_rate: 1.0,
            tool_budget_utilization: 0.5,
            active_tasks: 1,
            queued_tasks: 0,
            policy_violations: 0,
            queue_depth: 0,
            observer_degraded: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_and_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MetricsFileWriter::new(dir.path()).unwrap();

        writer.write(&sample()).await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join("metrics.json")).unwrap();
        let loaded: MetricsSnapshot = serde_json::from_str(&contents).unwrap();
        assert_eq!(loaded.active_tasks, 1);

        let mut second = sample();
        second.active_tasks = 42;
        writer.write(&second).await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join("metrics.json")).unwrap();
        let loaded: MetricsSnapshot = serde_json::from_str(&contents).unwrap();
        assert_eq!(loaded.active_tasks, 42);
    }
}
