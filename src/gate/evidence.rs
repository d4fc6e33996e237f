use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::GateConfig;
use crate::error::Result;
use crate::gate::{GateEvidence, PrerequisiteDocs};
use crate::runner::TestResult;

pub const PROBLEM_IDENTIFICATION_DOC: &str = "problem_identification.md";
pub const FIX_STRATEGY_DOC: &str = "fix_strategy.md";
pub const TEST_PLAN_DOC: &str = "test_plan.md";

/// Supplies the evidence the gates are evaluated against.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    async fn collect(&self) -> Result<GateEvidence>;
}

/// Reads evidence left on disk by the capture subsystem.
///
/// Layout under `evidence_dir`: `screenshots/` (any files), `console/` (log files,
/// one entry per line) and an optional `test_results.json` array. Missing pieces
/// count as empty evidence.
pub struct FsEvidenceProvider {
    evidence_dir: PathBuf,
    docs_dir: PathBuf,
}

impl FsEvidenceProvider {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            evidence_dir: config.evidence_dir.clone(),
            docs_dir: config.docs_dir.clone(),
        }
    }
}

async fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl EvidenceProvider for FsEvidenceProvider {
    async fn collect(&self) -> Result<GateEvidence> {
        let screenshots = file_names(&self.evidence_dir.join("screenshots")).await?;

        let console_dir = self.evidence_dir.join("console");
        let mut console_logs = Vec::new();
        for name in file_names(&console_dir).await? {
            if let Some(contents) = read_optional(&console_dir.join(&name)).await? {
                console_logs.extend(
                    contents
                        .lines()
                        .filter(|l| !l.trim().is_empty())
                        .map(str::to_string),
                );
            }
        }

        let test_results: Vec<TestResult> =
            match read_optional(&self.evidence_dir.join("test_results.json")).await? {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };

        let docs = PrerequisiteDocs {
            problem_identification: self.docs_dir.join(PROBLEM_IDENTIFICATION_DOC).is_file(),
            fix_strategy: self.docs_dir.join(FIX_STRATEGY_DOC).is_file(),
            test_plan: self.docs_dir.join(TEST_PLAN_DOC).is_file(),
        };

        tracing::debug!(
            screenshots = screenshots.len(),
            console_logs = console_logs.len(),
            test_results = test_results.len(),
            "Collected gate evidence"
        );
        Ok(GateEvidence {
            screenshots,
            console_logs,
            test_results,
            docs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::populate;

    fn provider(root: &Path) -> FsEvidenceProvider {
        FsEvidenceProvider::new(&GateConfig {
            evidence_dir: root.join("evidence"),
            docs_dir: root.join("docs"),
            ..GateConfig::default()
        })
    }

    #[tokio::test]
    async fn test_missing_dirs_are_empty_evidence() {
        let tmp = tempfile::tempdir().unwrap();
        let evidence = provider(tmp.path()).collect().await.unwrap();
        assert_eq!(evidence, GateEvidence::default());
    }

    #[tokio::test]
    async fn test_collects_files_logs_results_and_docs() {
        let tmp = tempfile::tempdir().unwrap();
        populate(
            tmp.path(),
            &[
                ("evidence/screenshots/02_mindmap.png", ""),
                ("evidence/screenshots/01_startup.png", ""),
                ("evidence/console/browser.log", "[sandbox] boot\n\nready\n"),
                (
                    "evidence/test_results.json",
                    r#"[{"name":"navigation","passed":true},{"name":"mindmap","passed":false,"error":"blank"}]"#,
                ),
                ("docs/fix_strategy.md", "# Fix"),
            ],
        );

        let evidence = provider(tmp.path()).collect().await.unwrap();
        assert_eq!(evidence.screenshots, vec!["01_startup.png", "02_mindmap.png"]);
        assert_eq!(evidence.console_logs, vec!["[sandbox] boot", "ready"]);
        assert_eq!(evidence.test_results.len(), 2);
        assert!(evidence.docs.fix_strategy);
        assert!(!evidence.docs.problem_identification);
    }
}
