use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{AppError, Result};
use crate::fsutil::write_atomic;
use crate::report::KEY_TIMESTAMP_FORMAT;
use crate::runner::TestResult;
use crate::workflow::types::RunReport;

const ARCHIVE_DIR: &str = "archives";

/// One JSON file per run report, named `{plan}_{timestamp}.json`.
#[derive(Debug, Clone)]
pub struct RunReportStore {
    dir: PathBuf,
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
        return Err(AppError::Internal(format!("invalid report key: {key:?}")));
    }
    Ok(())
}

/// The timestamp of `key` if it belongs to `plan`.
fn plan_timestamp<'a>(key: &'a str, plan: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(plan)?.strip_prefix('_')?;
    NaiveDateTime::parse_from_str(rest, KEY_TIMESTAMP_FORMAT)
        .ok()
        .map(|_| rest)
}

impl RunReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Persist a report under its id. Readers never see a partial file.
    pub async fn save(&self, report: &RunReport) -> Result<String> {
        validate_key(&report.id)?;
        let json = serde_json::to_vec_pretty(report)?;
        write_atomic(&self.path_for(&report.id), &json).await?;
        tracing::info!(report = %report.id, status = ?report.status, "Run report saved");
        Ok(report.id.clone())
    }

    pub async fn load(&self, key: &str) -> Result<Option<RunReport>> {
        validate_key(key)?;
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys stored for `plan`, newest first.
    pub async fn list(&self, plan: &str) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if !key.starts_with('.') && plan_timestamp(key, plan).is_some() {
                keys.push(key.to_string());
            }
        }
        keys.sort_unstable_by(|a, b| b.cmp(a));
        Ok(keys)
    }

    /// Keep the raw results of one run under `archives/<label>/test_results.json`.
    ///
    /// `label` is normally the synced release tag; a later run for the same tag replaces it.
    pub async fn archive_test_results(&self, label: &str, results: &[TestResult]) -> Result<PathBuf> {
        let label = label.replace(['/', '\\'], "_");
        validate_key(&label)?;
        let path = self.dir.join(ARCHIVE_DIR).join(label).join("test_results.json");
        write_atomic(&path, &serde_json::to_vec_pretty(results)?).await?;
        tracing::info!(archive = %path.display(), results = results.len(), "Archived test results");
        Ok(path)
    }

    /// Most recent report for `plan`. Absence is `Ok(None)`.
    pub async fn latest(&self, plan: &str) -> Result<Option<RunReport>> {
        match self.list(plan).await?.first() {
            Some(key) => self.load(key).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::RunStatus;
    use chrono::{TimeZone, Utc};

    fn report_at(plan: &str, secs: i64) -> RunReport {
        let mut report = RunReport::new(plan);
        report.started_at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        report.id = format!("{plan}_{}", report.started_at.format(KEY_TIMESTAMP_FORMAT));
        report.finalize(RunStatus::Completed);
        report
    }

    #[tokio::test]
    async fn latest_on_empty_store_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunReportStore::new(tmp.path().join("missing"));
        assert!(store.latest("nightly").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_picks_newest_of_the_plan() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunReportStore::new(tmp.path());

        let old = report_at("nightly", 0);
        let new = report_at("nightly", 3600);
        let other = report_at("nightly_extra", 7200);
        for r in [&new, &old, &other] {
            store.save(r).await.unwrap();
        }

        let latest = store.latest("nightly").await.unwrap().unwrap();
        assert_eq!(latest, new);
        assert_eq!(store.list("nightly").await.unwrap(), vec![new.id.clone(), old.id.clone()]);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunReportStore::new(tmp.path());
        let report = report_at("release-cycle", 5);

        let id = store.save(&report).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), Some(report));
    }

    #[tokio::test]
    async fn ignores_foreign_and_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunReportStore::new(tmp.path());
        std::fs::write(tmp.path().join("nightly_notes.json"), "{}").unwrap();
        std::fs::write(tmp.path().join(".nightly_2024-01-01T00-00-00.000Z.json.tmp"), "{").unwrap();

        assert!(store.latest("nightly").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archives_results_per_label_without_listing_them() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunReportStore::new(tmp.path());
        let results = vec![TestResult::pass("navigation"), TestResult::fail("mindmap", "timeout")];

        let path = store.archive_test_results("release/v2.3.0", &results).await.unwrap();
        assert_eq!(path, tmp.path().join("archives").join("release_v2.3.0").join("test_results.json"));
        let stored: Vec<TestResult> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, results);

        store.save(&report_at("release-cycle", 1)).await.unwrap();
        assert_eq!(store.list("release-cycle").await.unwrap().len(), 1);
        assert!(store.archive_test_results("..", &results).await.is_err());
    }

    #[test]
    fn rejects_path_like_keys() {
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("nightly_2024-01-01T00-00-00.000Z").is_ok());
    }
}
