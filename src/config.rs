use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub release: ReleaseConfig,
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default)]
    pub tests: TestConfig,
    #[serde(default)]
    pub reports: ReportConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Secret for `X-Hub-Signature-256`; the webhook route rejects everything when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

// Manual Debug impl to avoid leaking the webhook secret
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_secret: None,
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct ReleaseConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

// Manual Debug impl to avoid leaking the API token
impl std::fmt::Debug for ReleaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// The working tree the synchronizer owns.
    pub working_tree: PathBuf,
    /// Holds the retained snapshot, the release record and staging dirs.
    /// Must be outside `working_tree`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Version-control metadata directory, never touched by sync or restore.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_min_screenshots")]
    pub min_screenshots: usize,
    #[serde(default = "default_min_test_results")]
    pub min_test_results: usize,
    #[serde(default = "default_min_covered_features")]
    pub min_covered_features: usize,
    #[serde(default = "default_core_features")]
    pub core_features: Vec<String>,
    /// Feature whose rendering must be explicitly evidenced by a screenshot or test.
    #[serde(default = "default_focus_feature")]
    pub focus_feature: String,
    /// Directory holding problem/strategy/test-plan documents.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    /// Directory the capture subsystem drops screenshots, console logs and test results into.
    #[serde(default = "default_evidence_dir")]
    pub evidence_dir: PathBuf,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_screenshots: default_min_screenshots(),
            min_test_results: default_min_test_results(),
            min_covered_features: default_min_covered_features(),
            core_features: default_core_features(),
            focus_feature: default_focus_feature(),
            docs_dir: default_docs_dir(),
            evidence_dir: default_evidence_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TestConfig {
    /// Script path, relative to the working tree.
    #[serde(default = "default_test_script")]
    pub script: String,
    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            script: default_test_script(),
            timeout_secs: default_test_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_reports_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_plan_name")]
    pub plan_name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_reports_dir(),
            plan_name: default_plan_name(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_true")]
    pub stop_on_gate_failure: bool,
    #[serde(default)]
    pub skip_publish: bool,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Roll the tree back after this many unhealthy runs in a row; 0 disables.
    #[serde(default = "default_rollback_after_failures")]
    pub rollback_after_failures: u32,
    /// Keep the test results and known issues sections of the tree's README current.
    #[serde(default = "default_true")]
    pub update_readme: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            stop_on_gate_failure: true,
            skip_publish: false,
            run_timeout_secs: None,
            rollback_after_failures: default_rollback_after_failures(),
            update_readme: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

fn default_rollback_after_failures() -> u32 {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_poll_interval() -> u64 {
    3600
}

fn default_user_agent() -> String {
    "shipwright".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp/shipwright-state")
}

fn default_metadata_dir() -> String {
    ".git".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_author_name() -> String {
    "Shipwright Bot".to_string()
}

fn default_author_email() -> String {
    "shipwright@users.noreply.github.com".to_string()
}

fn default_min_screenshots() -> usize {
    5
}

fn default_min_test_results() -> usize {
    3
}

fn default_min_covered_features() -> usize {
    3
}

fn default_core_features() -> Vec<String> {
    ["navigation", "recording", "analysis", "taskbar", "mindmap"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_focus_feature() -> String {
    "mindmap".to_string()
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("shipwright-docs")
}

fn default_evidence_dir() -> PathBuf {
    PathBuf::from("shipwright-evidence")
}

fn default_test_script() -> String {
    "start_and_test.sh".to_string()
}

fn default_test_timeout() -> u64 {
    1800
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("shipwright-reports")
}

fn default_plan_name() -> String {
    "release-cycle".to_string()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("shipwright").required(false));
        }

        // Environment variable overrides with SHIPWRIGHT_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("SHIPWRIGHT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts that would make a snapshot copy itself or clobber the tree.
    pub fn validate(&self) -> Result<()> {
        let tree = &self.workspace.working_tree;
        if self.workspace.state_dir.starts_with(tree) {
            return Err(AppError::Config(format!(
                "state_dir {} must not be inside the working tree {}",
                self.workspace.state_dir.display(),
                tree.display()
            )));
        }
        if self.workspace.metadata_dir.is_empty() || self.workspace.metadata_dir.contains('/') {
            return Err(AppError::Config(format!(
                "metadata_dir must be a single directory name, got {:?}",
                self.workspace.metadata_dir
            )));
        }
        if self.reports.plan_name.is_empty() {
            return Err(AppError::Config("reports.plan_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn release_token(&self) -> Option<&str> {
        self.release.token.as_deref()
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.server.webhook_secret.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            release: ReleaseConfig {
                owner: "acme".to_string(),
                repo: "widget".to_string(),
                token: Some("ghp_secret".to_string()),
                poll_interval_secs: 60,
                user_agent: default_user_agent(),
            },
            workspace: WorkspaceConfig {
                working_tree: PathBuf::from("/srv/widget"),
                state_dir: PathBuf::from("/srv/state"),
                metadata_dir: ".git".to_string(),
                remote: default_remote(),
                branch: default_branch(),
                author_name: default_author_name(),
                author_email: default_author_email(),
            },
            gates: GateConfig::default(),
            tests: TestConfig::default(),
            reports: ReportConfig::default(),
            workflow: WorkflowConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = sample();
        let debug = format!("{:?}", config.release);
        assert!(!debug.contains("ghp_secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_validate_rejects_state_dir_inside_tree() {
        let mut config = sample();
        config.workspace.state_dir = PathBuf::from("/srv/widget/.state");
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_nested_metadata_dir() {
        let mut config = sample();
        config.workspace.metadata_dir = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gate_defaults() {
        let gates = GateConfig::default();
        assert_eq!(gates.min_screenshots, 5);
        assert_eq!(gates.min_covered_features, 3);
        assert_eq!(gates.core_features.len(), 5);
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_workflow_defaults() {
        let workflow = WorkflowConfig::default();
        assert!(workflow.stop_on_gate_failure);
        assert_eq!(workflow.rollback_after_failures, 5);
        assert!(workflow.update_readme);
    }
}
