use thiserror::Error;

use crate::workflow::types::RunReport;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("A workflow run is already in progress")]
    AlreadyRunning,

    #[error("Working tree is locked by another sync or publish")]
    TreeLocked,

    #[error("Release not found upstream: {0}")]
    ReleaseNotFound(String),

    #[error("Release source unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Sync to {tag} failed: {reason}{}", restore_suffix(.restore_error))]
    SyncFailed {
        tag: String,
        reason: String,
        /// Set when the automatic restore also failed; the tree may be inconsistent.
        restore_error: Option<String>,
    },

    #[error("No backup snapshot available")]
    NoBackupAvailable,

    #[error("Working tree has no changes to publish")]
    NothingToPublish,

    #[error("Publish failed after local commit: {0}")]
    PublishFailed(String),

    #[error("Release gates failed: {}", .failed.join(", "))]
    GateFailed { failed: Vec<String> },

    #[error("Step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<AppError>,
        /// The finalized (and persisted) partial report of the failed run.
        report: Box<RunReport>,
    },

    #[error("Run deadline exceeded before step {0}")]
    DeadlineExceeded(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Test runner error: {0}")]
    TestRunner(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn restore_suffix(restore_error: &Option<String>) -> String {
    match restore_error {
        Some(e) => format!(" (restore also failed: {e}; working tree may be inconsistent)"),
        None => String::new(),
    }
}

impl AppError {
    /// Stable snake_case name of the error kind, used in logs and persisted step errors.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::AlreadyRunning => "already_running",
            AppError::TreeLocked => "tree_locked",
            AppError::ReleaseNotFound(_) => "release_not_found",
            AppError::RemoteUnreachable(_) => "remote_unreachable",
            AppError::SyncFailed { .. } => "sync_failed",
            AppError::NoBackupAvailable => "no_backup_available",
            AppError::NothingToPublish => "nothing_to_publish",
            AppError::PublishFailed(_) => "publish_failed",
            AppError::GateFailed { .. } => "gate_failed",
            AppError::StepFailed { .. } => "step_failed",
            AppError::DeadlineExceeded(_) => "deadline_exceeded",
            AppError::Archive(_) => "archive",
            AppError::TestRunner(_) => "test_runner",
            AppError::Config(_) => "config",
            AppError::WebhookVerification(_) => "webhook_verification",
            AppError::GitHubApi(_) => "github_api",
            AppError::Git(_) => "git",
            AppError::Serialization(_) => "serialization",
            AppError::Http(_) => "http",
            AppError::Io(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }

    /// The partial run report carried by a failed run, if any.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            AppError::StepFailed { report, .. } => Some(&**report),
            _ => None,
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        AppError::GitHubApi(e.to_string())
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_failed_mentions_restore_failure() {
        let err = AppError::SyncFailed {
            tag: "v1.0.0".to_string(),
            reason: "corrupt archive".to_string(),
            restore_error: Some("disk full".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("corrupt archive"));
        assert!(msg.contains("restore also failed: disk full"));
        assert_eq!(err.kind(), "sync_failed");
    }

    #[test]
    fn test_gate_failed_lists_rules() {
        let err = AppError::GateFailed {
            failed: vec!["complete_workflow".to_string(), "test_plan".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Release gates failed: complete_workflow, test_plan"
        );
    }
}
