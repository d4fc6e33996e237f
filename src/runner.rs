use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TestConfig;
use crate::error::{AppError, Result};

/// One test outcome as reported by the test suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            output: String::new(),
            error: None,
        }
    }

    pub fn fail(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Runs the project's test suite.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, script: &str) -> Result<Vec<TestResult>>;
}

/// Runs a shell script inside the working tree.
///
/// Stdout lines that are JSON objects are read as individual results. A script that
/// prints none yields a single result named after the script, passing on exit 0.
pub struct ScriptTestRunner {
    working_dir: PathBuf,
    timeout: Duration,
}

impl ScriptTestRunner {
    pub fn new(working_dir: &Path, config: &TestConfig) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl TestRunner for ScriptTestRunner {
    async fn run(&self, script: &str) -> Result<Vec<TestResult>> {
        let script_path = self.working_dir.join(script);
        if !script_path.is_file() {
            return Err(AppError::TestRunner(format!(
                "test script not found: {}",
                script_path.display()
            )));
        }
        tracing::info!(script = %script_path.display(), "Running test script");

        let child = tokio::process::Command::new("sh")
            .arg(&script_path)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                AppError::TestRunner(format!(
                    "{script} timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::TestRunner(format!("failed to start {script}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let results = parse_results(&stdout);
        if !results.is_empty() {
            tracing::info!(count = results.len(), "Collected test results");
            return Ok(results);
        }

        let passed = output.status.success();
        tracing::info!(passed, status = ?output.status.code(), "Test script finished without structured results");
        Ok(vec![TestResult {
            name: script.to_string(),
            passed,
            output: tail(&stdout, 4000),
            error: (!passed).then(|| {
                let err = tail(&stderr, 4000);
                if err.trim().is_empty() {
                    format!("exit status {:?}", output.status.code())
                } else {
                    err
                }
            }),
        }])
    }
}

/// Parse `{"name", "passed", ...}` JSON lines; other lines are ignored.
fn parse_results(stdout: &str) -> Vec<TestResult> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<TestResult>(line).ok())
        .collect()
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}
