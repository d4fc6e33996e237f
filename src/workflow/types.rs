use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::report::KEY_TIMESTAMP_FORMAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One named unit of work inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    /// Step-specific payload.
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StepResult {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// The record of one workflow invocation.
///
/// Steps appear in execution order. Mutated only by the engine during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub steps: IndexMap<String, StepResult>,
    pub issues_found: usize,
    pub issues_analyzed: usize,
    /// Set when this run tipped the failure streak over the threshold and the tree was rolled back.
    #[serde(default)]
    pub rolled_back: bool,
}

impl RunReport {
    /// A new running report keyed `{plan}_{timestamp}`.
    pub fn new(plan_name: &str) -> Self {
        let started_at = Utc::now();
        Self {
            id: format!("{plan_name}_{}", started_at.format(KEY_TIMESTAMP_FORMAT)),
            started_at,
            ended_at: None,
            status: RunStatus::Running,
            steps: IndexMap::new(),
            issues_found: 0,
            issues_analyzed: 0,
            rolled_back: false,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.get(name)
    }

    /// The first failed step, if any.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.values().find(|s| s.status == StepStatus::Failed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::Internal(format!("run {} is already finalized", self.id)));
        }
        Ok(())
    }

    pub(crate) fn begin_step(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        if self.steps.contains_key(name) {
            return Err(AppError::Internal(format!("step {name} already recorded")));
        }
        self.steps.insert(
            name.to_string(),
            StepResult {
                name: name.to_string(),
                started_at: Utc::now(),
                ended_at: None,
                status: StepStatus::Running,
                result: None,
                error: None,
            },
        );
        Ok(())
    }

    fn finish_step(&mut self, name: &str, status: StepStatus) -> Result<&mut StepResult> {
        self.ensure_open()?;
        let step = self
            .steps
            .get_mut(name)
            .ok_or_else(|| AppError::Internal(format!("step {name} was never started")))?;
        if step.status != StepStatus::Running {
            return Err(AppError::Internal(format!(
                "step {name} is {:?}, not running",
                step.status
            )));
        }
        step.status = status;
        step.ended_at = Some(Utc::now());
        Ok(step)
    }

    pub(crate) fn complete_step(&mut self, name: &str, result: Option<serde_json::Value>) -> Result<()> {
        self.finish_step(name, StepStatus::Completed)?.result = result;
        Ok(())
    }

    pub(crate) fn fail_step(&mut self, name: &str, error: String) -> Result<()> {
        self.finish_step(name, StepStatus::Failed)?.error = Some(error);
        Ok(())
    }

    /// Record a step as skipped. Only valid for a step that never started.
    pub(crate) fn skip_step(&mut self, name: &str, reason: &str) -> Result<()> {
        self.ensure_open()?;
        if self.steps.contains_key(name) {
            return Err(AppError::Internal(format!("step {name} cannot be skipped once started")));
        }
        let now = Utc::now();
        self.steps.insert(
            name.to_string(),
            StepResult {
                name: name.to_string(),
                started_at: now,
                ended_at: Some(now),
                status: StepStatus::Skipped,
                result: Some(serde_json::json!({ "reason": reason })),
                error: None,
            },
        );
        Ok(())
    }

    /// Stamp the terminal status. Any step still running is marked failed.
    pub(crate) fn finalize(&mut self, status: RunStatus) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        for step in self.steps.values_mut() {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Failed;
                step.ended_at = Some(now);
                step.error.get_or_insert_with(|| "run ended while step was running".to_string());
            }
        }
        self.status = status;
        self.ended_at = Some(now);
    }
}

/// Per-invocation options for a workflow run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Sync this tag instead of checking for the latest release.
    pub revision: Option<String>,
    pub skip_publish: bool,
    pub publish_message: Option<String>,
    /// Overrides the configured run deadline.
    pub timeout: Option<std::time::Duration>,
}
