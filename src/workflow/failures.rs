use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsutil::write_atomic;

/// How many runs in a row ended unhealthy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub consecutive: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Run id of the most recent unhealthy run.
    pub last_run: Option<String>,
}

/// Consecutive-failure counter persisted beside the working tree, so restarts keep counting.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    path: PathBuf,
}

impl FailureTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The stored record; a missing file is a zero count.
    pub async fn load(&self) -> Result<FailureRecord> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FailureRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, record: &FailureRecord) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(record)?).await
    }

    /// Count one more unhealthy run; returns the new streak length.
    pub async fn record_failure(&self, run_id: &str) -> Result<u32> {
        let mut record = self.load().await?;
        record.consecutive = record.consecutive.saturating_add(1);
        record.last_failure_at = Some(Utc::now());
        record.last_run = Some(run_id.to_string());
        self.store(&record).await?;
        Ok(record.consecutive)
    }

    pub async fn reset(&self) -> Result<()> {
        if self.load().await?.consecutive == 0 {
            return Ok(());
        }
        self.store(&FailureRecord::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = FailureTracker::new(tmp.path().join("widget.failures.json"));
        assert_eq!(tracker.load().await.unwrap(), FailureRecord::default());
    }

    #[tokio::test]
    async fn test_streak_survives_a_new_tracker_and_resets() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("widget.failures.json");

        let tracker = FailureTracker::new(&path);
        assert_eq!(tracker.record_failure("run_1").await.unwrap(), 1);
        assert_eq!(tracker.record_failure("run_2").await.unwrap(), 2);

        let restarted = FailureTracker::new(&path);
        let record = restarted.load().await.unwrap();
        assert_eq!(record.consecutive, 2);
        assert_eq!(record.last_run.as_deref(), Some("run_2"));
        assert_eq!(restarted.record_failure("run_3").await.unwrap(), 3);

        restarted.reset().await.unwrap();
        assert_eq!(tracker.load().await.unwrap().consecutive, 0);
    }
}
