//! Fakes for the external collaborators and small filesystem helpers for tests.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use crate::error::{AppError, Result};
use crate::gate::{EvidenceProvider, GateEvidence, PrerequisiteDocs};
use crate::release::{CommitSummary, ReleaseRef, RemoteReleaseSource, VersionControlBackend};
use crate::runner::{TestResult, TestRunner};

/// Create files (and parent dirs) under `root`.
pub fn populate(root: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(root).unwrap();
    for (path, contents) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

/// Relative path -> contents for every file under `root`, skipping top-level `exclude`.
pub fn tree_digest(root: &Path, exclude: &str) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == exclude))
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned();
            let contents = if e.file_type().is_file() {
                fs::read(e.path()).unwrap()
            } else {
                b"<dir>".to_vec()
            };
            (rel, contents)
        })
        .collect()
}

/// Write a gzipped tarball with the given files.
pub fn write_tarball(path: &Path, files: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

type Files = Vec<(String, String)>;

/// In-memory release source. The last release added is the latest.
#[derive(Default)]
pub struct FakeReleaseSource {
    releases: Vec<(String, Files)>,
    unreachable: bool,
    download_delay: Option<Duration>,
    corrupt: Mutex<HashSet<String>>,
    tamper: Mutex<Option<PathBuf>>,
    downloads: AtomicUsize,
}

impl FakeReleaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_release(mut self, tag: &str, files: &[(&str, &str)]) -> Self {
        let files = files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect();
        self.releases.push((tag.to_string(), files));
        self
    }

    pub fn with_corrupt(self, tag: &str) -> Self {
        self.corrupt(tag);
        self
    }

    pub fn with_download_delay(mut self, millis: u64) -> Self {
        self.download_delay = Some(Duration::from_millis(millis));
        self
    }

    /// Serve a non-gzip payload for `tag`.
    pub fn corrupt(&self, tag: &str) {
        self.corrupt.lock().unwrap().insert(tag.to_string());
    }

    /// On the next download, scribble over `tree` and then fail.
    pub fn tamper_on_download(&self, tree: &Path) {
        *self.tamper.lock().unwrap() = Some(tree.to_path_buf());
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn release_ref(tag: &str) -> ReleaseRef {
        ReleaseRef::new(tag, format!("https://example.test/{tag}.tar.gz"))
    }
}

#[async_trait]
impl RemoteReleaseSource for FakeReleaseSource {
    async fn latest_release(&self) -> Result<ReleaseRef> {
        if self.unreachable {
            return Err(AppError::RemoteUnreachable("connection refused".to_string()));
        }
        self.releases
            .last()
            .map(|(tag, _)| Self::release_ref(tag))
            .ok_or_else(|| AppError::ReleaseNotFound("latest".to_string()))
    }

    async fn release_by_tag(&self, tag: &str) -> Result<ReleaseRef> {
        if self.unreachable {
            return Err(AppError::RemoteUnreachable("connection refused".to_string()));
        }
        self.releases
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(t, _)| Self::release_ref(t))
            .ok_or_else(|| AppError::ReleaseNotFound(tag.to_string()))
    }

    async fn download_asset(&self, release: &ReleaseRef, dest_dir: &Path) -> Result<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        let tamper = self.tamper.lock().unwrap().take();
        if let Some(tree) = tamper {
            fs::write(tree.join("README.md"), "tampered")?;
            fs::write(tree.join("junk.bin"), [0u8, 1, 2])?;
            return Err(AppError::Archive("replace interrupted".to_string()));
        }

        let path = dest_dir.join(format!("{}.tar.gz", release.tag));
        if self.corrupt.lock().unwrap().contains(&release.tag) {
            fs::write(&path, b"definitely not a tarball")?;
            return Ok(path);
        }
        let (_, files) = self
            .releases
            .iter()
            .find(|(t, _)| *t == release.tag)
            .ok_or_else(|| AppError::ReleaseNotFound(release.tag.clone()))?;
        let files: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        write_tarball(&path, &files);
        Ok(path)
    }
}

/// Version control that only records what it was asked to do.
pub struct FakeVcs {
    tags: Vec<String>,
    dirty: AtomicBool,
    push_fails: bool,
    commits: Mutex<Vec<String>>,
    pushes: AtomicUsize,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self {
            tags: Vec::new(),
            dirty: AtomicBool::new(false),
            push_fails: false,
            commits: Mutex::new(Vec::new()),
            pushes: AtomicUsize::new(0),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn dirty(self) -> Self {
        self.dirty.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.push_fails = true;
        self
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionControlBackend for FakeVcs {
    fn metadata_dir(&self) -> &str {
        ".git"
    }

    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    async fn current_tags(&self, _dir: &Path) -> Result<Vec<String>> {
        Ok(self.tags.clone())
    }

    async fn has_changes(&self, _dir: &Path) -> Result<bool> {
        Ok(self.dirty.load(Ordering::SeqCst))
    }

    async fn add_all(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, _dir: &Path, message: &str) -> Result<String> {
        self.commits.lock().unwrap().push(message.to_string());
        self.dirty.store(false, Ordering::SeqCst);
        Ok("abc1234".to_string())
    }

    async fn push(&self, _dir: &Path) -> Result<()> {
        if self.push_fails {
            return Err(AppError::Git("remote rejected refs/heads/main".to_string()));
        }
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn head_summary(&self, _dir: &Path) -> Result<Option<CommitSummary>> {
        Ok(None)
    }

    async fn current_branch(&self, _dir: &Path) -> Result<Option<String>> {
        Ok(Some("main".to_string()))
    }
}

/// Test runner returning canned results, or an error.
pub struct FakeRunner {
    results: Vec<TestResult>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeRunner {
    pub fn passing(names: &[&str]) -> Self {
        Self::with_results(names.iter().map(|n| TestResult::pass(*n)).collect())
    }

    pub fn with_results(results: Vec<TestResult>) -> Self {
        Self {
            results,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TestRunner for FakeRunner {
    async fn run(&self, _script: &str) -> Result<Vec<TestResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::TestRunner("script exited before reporting".to_string()));
        }
        Ok(self.results.clone())
    }
}

/// Evidence provider that hands back a fixed value.
pub struct StaticEvidence(pub GateEvidence);

#[async_trait]
impl EvidenceProvider for StaticEvidence {
    async fn collect(&self) -> Result<GateEvidence> {
        Ok(self.0.clone())
    }
}

/// Evidence that satisfies every default gate rule.
pub fn complete_evidence() -> GateEvidence {
    GateEvidence {
        screenshots: vec![
            "01_startup.png".to_string(),
            "02_navigation.png".to_string(),
            "03_recording.png".to_string(),
            "04_mindmap.png".to_string(),
            "05_real_env_taskbar.png".to_string(),
            "06_analysis.png".to_string(),
        ],
        console_logs: vec!["[sandbox] app started".to_string(), "ready".to_string()],
        test_results: vec![
            TestResult::pass("navigation_flow"),
            TestResult::pass("recording_start_stop"),
            TestResult::pass("mindmap_render"),
            TestResult::fail("analysis_export", "export button missing"),
        ],
        docs: PrerequisiteDocs {
            problem_identification: true,
            fix_strategy: true,
            test_plan: true,
        },
    }
}

/// An engine over fakes rooted at `root`: one release `v2.3.0`, passing tests,
/// complete evidence and a clean tree.
pub fn engine_for_tests(root: &Path) -> std::sync::Arc<crate::workflow::engine::WorkflowEngine> {
    use std::sync::Arc;

    use crate::config::{GateConfig, WorkspaceConfig};
    use crate::gate::GateValidator;
    use crate::release::ReleaseSynchronizer;
    use crate::report::RunReportStore;
    use crate::workflow::engine::{EngineSettings, WorkflowEngine};

    let tree = root.join("widget");
    populate(&tree, &[("README.md", "old"), (".git/HEAD", "ref: main")]);
    let workspace = WorkspaceConfig {
        working_tree: tree,
        state_dir: root.join("state"),
        metadata_dir: ".git".to_string(),
        remote: "origin".to_string(),
        branch: "main".to_string(),
        author_name: "Test".to_string(),
        author_email: "test@example.com".to_string(),
    };
    let source = FakeReleaseSource::new().with_release("v2.3.0", &[("w/README.md", "new")]);
    let synchronizer = Arc::new(ReleaseSynchronizer::new(
        &workspace,
        Arc::new(source),
        Arc::new(FakeVcs::new()),
    ));

    Arc::new(WorkflowEngine::new(
        EngineSettings {
            plan_name: "release-cycle".to_string(),
            test_script: "start_and_test.sh".to_string(),
            docs_dir: root.join("docs"),
            stop_on_gate_failure: true,
            skip_publish: false,
            run_timeout: None,
            rollback_after_failures: 5,
            update_readme: true,
        },
        synchronizer,
        GateValidator::new(GateConfig::default()),
        Arc::new(StaticEvidence(complete_evidence())),
        Arc::new(FakeRunner::passing(&["navigation"])),
        RunReportStore::new(root.join("reports")),
    ))
}
