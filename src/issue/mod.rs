//! Turning test failures into issues and issues into canned repair plans.

pub mod classifier;
pub mod documents;
pub mod strategy;

use serde::{Deserialize, Serialize};

use crate::runner::TestResult;

pub use classifier::classify;
pub use strategy::strategize;

/// A failure as reported by the test suite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFailure {
    pub test_name: Option<String>,
    pub message: String,
    pub description: String,
}

impl RawFailure {
    pub fn from_test(result: &TestResult) -> Self {
        Self {
            test_name: Some(result.name.clone()),
            message: result.error.clone().unwrap_or_default(),
            description: result.output.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseCategory {
    Timeout,
    NotFound,
    Permission,
    MissingDependency,
    UiBlocked,
    Unknown,
}

impl CauseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CauseCategory::Timeout => "timeout",
            CauseCategory::NotFound => "not_found",
            CauseCategory::Permission => "permission",
            CauseCategory::MissingDependency => "missing_dependency",
            CauseCategory::UiBlocked => "ui_blocked",
            CauseCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CauseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub cause_category: CauseCategory,
    pub source_test_id: Option<String>,
    /// 0.0..=1.0; lowest for `Unknown`.
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairStrategy {
    pub actions: Vec<String>,
    pub effort: Effort,
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlan {
    pub steps: Vec<String>,
    pub verification_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    /// Back-reference to the issue this solves.
    pub issue_id: String,
    pub location_report: String,
    pub repair_strategy: RepairStrategy,
    pub test_plan: TestPlan,
}
