use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::gate::{EvidenceProvider, GateReport, GateValidator};
use crate::issue::{classify, documents, strategize, Issue, RawFailure, Solution};
use crate::release::lock::TreeGuard;
use crate::release::{PublishOutcome, ReleaseRef, ReleaseSynchronizer, UpdateCheck};
use crate::report::RunReportStore;
use crate::runner::{TestResult, TestRunner};
use crate::workflow::failures::FailureTracker;
use crate::workflow::types::{RunOptions, RunReport, RunStatus};

pub const CHECK_AND_SYNC: &str = "checkAndSync";
pub const VERIFY_GATES: &str = "verifyGates";
pub const RUN_TESTS: &str = "runTestsAndCollect";
pub const ANALYZE_ISSUES: &str = "analyzeIssues";
pub const PUBLISH: &str = "publish";

/// Engine settings taken from the app config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub plan_name: String,
    pub test_script: String,
    pub docs_dir: PathBuf,
    pub stop_on_gate_failure: bool,
    pub skip_publish: bool,
    pub run_timeout: Option<Duration>,
    /// Unhealthy runs in a row before the tree is rolled back; 0 disables.
    pub rollback_after_failures: u32,
    pub update_readme: bool,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            plan_name: config.reports.plan_name.clone(),
            test_script: config.tests.script.clone(),
            docs_dir: config.gates.docs_dir.clone(),
            stop_on_gate_failure: config.workflow.stop_on_gate_failure,
            skip_publish: config.workflow.skip_publish,
            run_timeout: config.workflow.run_timeout_secs.map(Duration::from_secs),
            rollback_after_failures: config.workflow.rollback_after_failures,
            update_readme: config.workflow.update_readme,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
enum SyncSummary {
    Synced { release: ReleaseRef },
    UpToDate { tag: String },
    SourceUnreachable { reason: String },
}

impl SyncSummary {
    fn tag(&self) -> Option<&str> {
        match self {
            SyncSummary::Synced { release } => Some(&release.tag),
            SyncSummary::UpToDate { tag } => Some(tag),
            SyncSummary::SourceUnreachable { .. } => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct TestSummary {
    total: usize,
    passed: usize,
    failed: usize,
    results: Vec<TestResult>,
    issues: Vec<Issue>,
    archive: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct AnalysisSummary {
    solutions: Vec<Solution>,
    documents: Vec<PathBuf>,
}

/// A step failure: the step name and the error that stopped the run.
type StepError = (String, AppError);

/// Clears the running flag and releases the run lock when a run ends, however it ends.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    _lock: TreeGuard,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Sequences the release cycle: sync, gates, tests, analysis, publish.
pub struct WorkflowEngine {
    settings: EngineSettings,
    synchronizer: Arc<ReleaseSynchronizer>,
    gates: GateValidator,
    evidence: Arc<dyn EvidenceProvider>,
    runner: Arc<dyn TestRunner>,
    store: RunReportStore,
    failures: FailureTracker,
    running: AtomicBool,
}

impl WorkflowEngine {
    pub fn new(
        settings: EngineSettings,
        synchronizer: Arc<ReleaseSynchronizer>,
        gates: GateValidator,
        evidence: Arc<dyn EvidenceProvider>,
        runner: Arc<dyn TestRunner>,
        store: RunReportStore,
    ) -> Self {
        let failures = FailureTracker::new(synchronizer.state_file("failures.json"));
        Self {
            settings,
            synchronizer,
            gates,
            evidence,
            runner,
            store,
            failures,
            running: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &RunReportStore {
        &self.store
    }

    pub fn synchronizer(&self) -> &ReleaseSynchronizer {
        &self.synchronizer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Claim the engine and the tree's run lock; another engine on the same tree,
    /// in this process or another, makes this `AlreadyRunning`.
    fn try_begin(&self) -> Result<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::AlreadyRunning)?;
        match self.synchronizer.run_lock().try_acquire() {
            Ok(lock) => Ok(RunGuard {
                running: &self.running,
                _lock: lock,
            }),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(match e {
                    AppError::TreeLocked => AppError::AlreadyRunning,
                    other => other,
                })
            }
        }
    }

    /// Run the whole cycle once.
    ///
    /// The report is finalized and persisted on every path. A failing step stops the
    /// run and comes back as `AppError::StepFailed` carrying that report.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let _guard = self.try_begin()?;

        let mut report = RunReport::new(&self.settings.plan_name);
        let deadline = options
            .timeout
            .or(self.settings.run_timeout)
            .map(|t| Instant::now() + t);
        tracing::info!(run = %report.id, revision = ?options.revision, "Workflow run started");

        let outcome = self.execute(&mut report, &options, deadline).await;

        report.finalize(match outcome {
            Ok(()) => RunStatus::Completed,
            Err(_) => RunStatus::Failed,
        });
        report.rolled_back = self.track_health(&report).await;
        if let Err(e) = self.store.save(&report).await {
            tracing::error!(run = %report.id, error = %e, "Failed to persist run report");
        }

        match outcome {
            Ok(()) => {
                tracing::info!(run = %report.id, "Workflow run completed");
                Ok(report)
            }
            Err((step, source)) => {
                tracing::error!(run = %report.id, step = %step, error = %source, "Workflow run failed");
                Err(AppError::StepFailed {
                    step,
                    source: Box::new(source),
                    report: Box::new(report),
                })
            }
        }
    }

    async fn execute(
        &self,
        report: &mut RunReport,
        options: &RunOptions,
        deadline: Option<Instant>,
    ) -> std::result::Result<(), StepError> {
        let synced = self
            .step(report, CHECK_AND_SYNC, deadline, self.check_and_sync(options))
            .await?;

        self.step(report, VERIFY_GATES, deadline, self.verify_gates())
            .await?;

        let label = synced.tag().unwrap_or(report.id.as_str()).to_string();
        let tests = self
            .step(report, RUN_TESTS, deadline, self.run_tests(&label))
            .await?;
        report.issues_found = tests.issues.len();

        if tests.issues.is_empty() {
            // The prerequisite documents still have to exist for publish
            if let Err(e) = documents::write_clean_documents(&self.settings.docs_dir).await {
                tracing::warn!(error = %e, "Could not write clean-run documents");
            }
            self.skip(report, ANALYZE_ISSUES, "no issues found")?;
        } else {
            let analysis = self
                .step(report, ANALYZE_ISSUES, deadline, self.analyze(&tests.issues))
                .await?;
            report.issues_analyzed = analysis.solutions.len();
        }
        self.update_readme(&tests).await;

        if options.skip_publish || self.settings.skip_publish {
            self.skip(report, PUBLISH, "publishing disabled for this run")?;
            return Ok(());
        }

        // Decided before the step starts so a clean tree is Skipped, never Failed
        match self.synchronizer.status().await {
            Ok(status) if !status.has_uncommitted_changes => {
                self.skip(report, PUBLISH, "nothing to publish")?;
            }
            Ok(_) => {
                let message = options.publish_message.clone().or_else(|| match &synced {
                    SyncSummary::Synced { release } => Some(format!("chore: sync release {}", release.tag)),
                    _ => None,
                });
                self.step(report, PUBLISH, deadline, self.publish(message))
                    .await?;
            }
            Err(e) => {
                let failure = record_failure(report, PUBLISH, e);
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Wrap one step: mark it running, run the body, record the outcome.
    async fn step<T, F>(
        &self,
        report: &mut RunReport,
        name: &str,
        deadline: Option<Instant>,
        body: F,
    ) -> std::result::Result<T, StepError>
    where
        T: Serialize,
        F: Future<Output = Result<T>>,
    {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(step = %name, "Run deadline passed, not starting step");
            return Err(record_failure(
                report,
                name,
                AppError::DeadlineExceeded(name.to_string()),
            ));
        }

        report
            .begin_step(name)
            .map_err(|e| (name.to_string(), e))?;
        tracing::info!(step = %name, "Step started");

        match body.await {
            Ok(value) => {
                let result = match serde_json::to_value(&value) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!(step = %name, error = %e, "Step result not serializable");
                        None
                    }
                };
                report
                    .complete_step(name, result)
                    .map_err(|e| (name.to_string(), e))?;
                tracing::info!(step = %name, "Step completed");
                Ok(value)
            }
            Err(e) => {
                tracing::error!(step = %name, kind = e.kind(), error = %e, "Step failed");
                report
                    .fail_step(name, format!("{}: {e}", e.kind()))
                    .map_err(|e| (name.to_string(), e))?;
                Err((name.to_string(), e))
            }
        }
    }

    fn skip(&self, report: &mut RunReport, name: &str, reason: &str) -> std::result::Result<(), StepError> {
        tracing::info!(step = %name, reason, "Step skipped");
        report
            .skip_step(name, reason)
            .map_err(|e| (name.to_string(), e))
    }

    async fn check_and_sync(&self, options: &RunOptions) -> Result<SyncSummary> {
        if let Some(tag) = &options.revision {
            let release = self.synchronizer.sync(Some(tag)).await?;
            return Ok(SyncSummary::Synced { release });
        }

        match self.synchronizer.has_update().await? {
            UpdateCheck::Available(release) => {
                let release = self.synchronizer.sync(Some(&release.tag)).await?;
                Ok(SyncSummary::Synced { release })
            }
            UpdateCheck::UpToDate(release) => Ok(SyncSummary::UpToDate { tag: release.tag }),
            UpdateCheck::Unreachable { reason } => Ok(SyncSummary::SourceUnreachable { reason }),
        }
    }

    /// Evidence gates. Missing prerequisite documents are left for the publish check,
    /// since analysis is what writes them.
    async fn verify_gates(&self) -> Result<GateReport> {
        let evidence = self.evidence.collect().await?;
        let gate_report = self.gates.verify_all(&evidence);

        for warning in &gate_report.warnings {
            tracing::warn!(warning = %warning, "Gate warning");
        }
        let deferred = gate_report.prerequisite_failures();
        if !deferred.is_empty() {
            tracing::info!(missing = ?deferred, "Prerequisite documents checked again before publish");
        }
        let blocking = gate_report.blocking_failures();
        if !blocking.is_empty() {
            tracing::warn!(failed = ?blocking, "Release gates not satisfied");
            if self.settings.stop_on_gate_failure {
                return Err(AppError::GateFailed { failed: blocking });
            }
        }
        Ok(gate_report)
    }

    async fn run_tests(&self, label: &str) -> Result<TestSummary> {
        let results = self.runner.run(&self.settings.test_script).await?;
        let issues: Vec<Issue> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| classify(&RawFailure::from_test(r)))
            .collect();

        let passed = results.iter().filter(|r| r.passed).count();
        tracing::info!(total = results.len(), passed, issues = issues.len(), "Tests finished");

        let archive = match self.store.archive_test_results(label, &results).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(label, error = %e, "Could not archive test results");
                None
            }
        };
        Ok(TestSummary {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
            issues,
            archive,
        })
    }

    async fn analyze(&self, issues: &[Issue]) -> Result<AnalysisSummary> {
        let solutions: Vec<Solution> = issues.iter().map(strategize).collect();
        let documents = documents::write_documents(&self.settings.docs_dir, issues, &solutions).await?;
        Ok(AnalysisSummary {
            solutions,
            documents,
        })
    }

    async fn update_readme(&self, tests: &TestSummary) {
        if !self.settings.update_readme {
            return;
        }
        let edit = |readme: &str| documents::readme_with_results(readme, &tests.results, &tests.issues);
        match self.synchronizer.update_tree_file(documents::README, edit).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Working tree has no README, skipping test write-up"),
            Err(e) => tracing::warn!(error = %e, "Could not update README with test results"),
        }
    }

    /// Publish once the prerequisite documents exist.
    async fn publish(&self, message: Option<String>) -> Result<PublishOutcome> {
        let evidence = self.evidence.collect().await?;
        let missing = self.gates.verify_all(&evidence).prerequisite_failures();
        if !missing.is_empty() {
            if self.settings.stop_on_gate_failure {
                return Err(AppError::GateFailed { failed: missing });
            }
            tracing::warn!(missing = ?missing, "Publishing without prerequisite documents");
        }
        self.synchronizer.publish(message.as_deref()).await
    }

    /// Update the failure streak after a run; returns whether the tree was rolled back.
    ///
    /// A run is unhealthy when it failed or its tests raised issues.
    async fn track_health(&self, report: &RunReport) -> bool {
        if report.status == RunStatus::Completed && report.issues_found == 0 {
            if let Err(e) = self.failures.reset().await {
                tracing::warn!(error = %e, "Could not reset failure streak");
            }
            return false;
        }

        let streak = match self.failures.record_failure(&report.id).await {
            Ok(streak) => streak,
            Err(e) => {
                tracing::warn!(error = %e, "Could not record failed run");
                return false;
            }
        };
        let threshold = self.settings.rollback_after_failures;
        if threshold == 0 || streak < threshold {
            tracing::info!(streak, threshold, "Unhealthy run recorded");
            return false;
        }

        tracing::warn!(streak, threshold, "Failure threshold reached, rolling back working tree");
        let rolled_back = match self.synchronizer.rollback().await {
            Ok(snapshot) => {
                tracing::info!(snapshot = %snapshot.path.display(), "Rolled back after repeated failures");
                true
            }
            Err(AppError::NoBackupAvailable) => {
                tracing::warn!("No snapshot to roll back to");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Automatic rollback failed");
                return false;
            }
        };
        if let Err(e) = self.failures.reset().await {
            tracing::warn!(error = %e, "Could not reset failure streak");
        }
        rolled_back
    }
}

/// Record `name` as failed without running it.
fn record_failure(report: &mut RunReport, name: &str, error: AppError) -> StepError {
    let message = format!("{}: {error}", error.kind());
    if let Err(e) = report
        .begin_step(name)
        .and_then(|()| report.fail_step(name, message))
    {
        tracing::error!(step = %name, error = %e, "Could not record step failure");
    }
    (name.to_string(), error)
}
