use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::fsutil::write_atomic;
use crate::release::lock::TreeLock;
use crate::release::snapshot::{self, RepoSnapshot};
use crate::release::{
    archive, PublishOutcome, ReleaseRecord, ReleaseRef, RemoteReleaseSource, RepoStatus,
    UpdateCheck, VersionControlBackend,
};

fn state_file_in(state_dir: &Path, tree: &Path, suffix: &str) -> PathBuf {
    let name = tree
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    state_dir.join(format!("{name}.{suffix}"))
}

/// Owns one working tree: pulls releases into it and publishes changes out of it.
///
/// Every method that writes to the tree holds the tree lock for its whole duration.
/// Exactly one snapshot (the latest pre-sync copy) is retained for rollback.
pub struct ReleaseSynchronizer {
    tree: PathBuf,
    state_dir: PathBuf,
    source: Arc<dyn RemoteReleaseSource>,
    vcs: Arc<dyn VersionControlBackend>,
    lock: TreeLock,
    snapshot: Mutex<Option<RepoSnapshot>>,
}

impl ReleaseSynchronizer {
    pub fn new(
        workspace: &WorkspaceConfig,
        source: Arc<dyn RemoteReleaseSource>,
        vcs: Arc<dyn VersionControlBackend>,
    ) -> Self {
        let lock = TreeLock::new(state_file_in(&workspace.state_dir, &workspace.working_tree, "lock"));
        Self {
            tree: workspace.working_tree.clone(),
            state_dir: workspace.state_dir.clone(),
            source,
            vcs,
            lock,
            snapshot: Mutex::new(None),
        }
    }

    pub fn tree(&self) -> &Path {
        &self.tree
    }

    /// The snapshot `rollback` would restore, if any.
    ///
    /// Falls back to the persisted handle so a fresh process can still roll back.
    pub async fn current_snapshot(&self) -> Result<Option<RepoSnapshot>> {
        let mut slot = self.snapshot.lock().await;
        if slot.is_none() {
            *slot = match tokio::fs::read(self.handle_path()).await {
                Ok(bytes) => Some(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
        }
        Ok(slot.clone())
    }

    /// `<state_dir>/<tree name>.<suffix>`, for state kept beside the tree.
    pub fn state_file(&self, suffix: &str) -> PathBuf {
        state_file_in(&self.state_dir, &self.tree, suffix)
    }

    /// Lock held by a workflow run across all its steps, shared by every process on this tree.
    pub fn run_lock(&self) -> TreeLock {
        TreeLock::new(self.state_file("run.lock"))
    }

    fn record_path(&self) -> PathBuf {
        self.state_file("release_record.json")
    }

    fn handle_path(&self) -> PathBuf {
        self.state_file("snapshot.json")
    }

    pub async fn release_record(&self) -> Result<Option<ReleaseRecord>> {
        match tokio::fs::read(self.record_path()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: Option<&ReleaseRecord>) -> Result<()> {
        let path = self.record_path();
        match record {
            Some(record) => write_atomic(&path, &serde_json::to_vec_pretty(record)?).await,
            None => match tokio::fs::remove_file(&path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            },
        }
    }

    /// Tags considered applied: the VCS tag list plus the recorded release. No network.
    pub async fn known_tags(&self) -> Result<Vec<String>> {
        let mut tags = self.vcs.current_tags(&self.tree).await?;
        if let Some(record) = self.release_record().await? {
            if !tags.contains(&record.tag) {
                tags.push(record.tag);
            }
        }
        Ok(tags)
    }

    /// Compare the latest upstream release against the local tags.
    ///
    /// An unreachable source yields `UpdateCheck::Unreachable`, not an error.
    pub async fn has_update(&self) -> Result<UpdateCheck> {
        let mut latest = match self.source.latest_release().await {
            Ok(release) => release,
            Err(e) => {
                tracing::warn!(error = %e, "Release source unreachable, treating as no update");
                return Ok(UpdateCheck::Unreachable {
                    reason: e.to_string(),
                });
            }
        };

        let known = self.known_tags().await?;
        latest.is_downloaded = known.contains(&latest.tag);
        tracing::debug!(tag = %latest.tag, downloaded = latest.is_downloaded, "Checked for update");

        if latest.is_downloaded {
            Ok(UpdateCheck::UpToDate(latest))
        } else {
            Ok(UpdateCheck::Available(latest))
        }
    }

    /// Replace the tree (metadata dir excepted) with the contents of a release.
    ///
    /// Resolves the latest release when `tag` is `None`. Any failure after the snapshot
    /// was taken restores the tree and is reported as `SyncFailed`.
    pub async fn sync(&self, tag: Option<&str>) -> Result<ReleaseRef> {
        let _guard = self.lock.try_acquire()?;

        let mut release = match tag {
            Some(tag) => self.source.release_by_tag(tag).await?,
            None => self.source.latest_release().await?,
        };
        tracing::info!(tag = %release.tag, tree = %self.tree.display(), "Syncing release");

        let previous = self.release_record().await?;
        if previous.as_ref().is_some_and(|r| r.tag == release.tag) {
            tracing::info!(tag = %release.tag, "Release already applied, re-applying");
        }

        let snapshot = self
            .capture_snapshot(previous)
            .await
            .map_err(|e| AppError::SyncFailed {
                tag: release.tag.clone(),
                reason: format!("snapshot failed: {e}"),
                restore_error: None,
            })?;
        self.retain(snapshot).await;

        if let Err(e) = self.apply(&release).await {
            tracing::error!(tag = %release.tag, error = %e, "Sync failed, restoring snapshot");
            let restore_error = match self.restore_current().await {
                Ok(_) => None,
                Err(re) => {
                    tracing::error!(error = %re, "Restore after failed sync also failed");
                    Some(re.to_string())
                }
            };
            return Err(AppError::SyncFailed {
                tag: release.tag.clone(),
                reason: e.to_string(),
                restore_error,
            });
        }

        release.is_downloaded = true;
        tracing::info!(tag = %release.tag, "Sync completed");
        Ok(release)
    }

    async fn capture_snapshot(&self, record: Option<ReleaseRecord>) -> Result<RepoSnapshot> {
        let tree = self.tree.clone();
        let state_dir = self.state_dir.clone();
        let exclude = self.vcs.metadata_dir().to_string();

        tokio::task::spawn_blocking(move || snapshot::capture(&tree, &state_dir, &exclude, record))
            .await
            .map_err(|e| AppError::Internal(format!("Snapshot task panicked: {e}")))?
    }

    /// Make `snapshot` the single live one and prune every older copy.
    async fn retain(&self, snapshot: RepoSnapshot) {
        let tree = self.tree.clone();
        let state_dir = self.state_dir.clone();
        let keep = snapshot.path.clone();
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = write_atomic(&self.handle_path(), &json).await {
                    tracing::warn!(error = %e, "Failed to persist snapshot handle");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize snapshot handle"),
        }
        *self.snapshot.lock().await = Some(snapshot);

        let pruned = tokio::task::spawn_blocking(move || {
            snapshot::prune_except(&tree, &state_dir, &keep)
        })
        .await;
        match pruned {
            Ok(Ok(n)) if n > 0 => tracing::info!(pruned = n, "Pruned superseded snapshots"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to prune old snapshots"),
            Err(e) => tracing::warn!(error = %e, "Prune task panicked"),
        }
    }

    async fn apply(&self, release: &ReleaseRef) -> Result<()> {
        let staging = tempfile::Builder::new()
            .prefix("stage-")
            .tempdir_in(&self.state_dir)?;

        let archive_path = self.source.download_asset(release, staging.path()).await?;

        let content_dir = staging.path().join("content");
        let tree = self.tree.clone();
        let exclude = self.vcs.metadata_dir().to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let root = archive::extract(&archive_path, &content_dir)?;
            snapshot::clear_tree(&tree, &exclude)?;
            snapshot::move_tree_contents(&root, &tree, &exclude)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Replace task panicked: {e}")))??;

        self.write_record(Some(&ReleaseRecord {
            tag: release.tag.clone(),
            downloaded_at: Utc::now(),
        }))
        .await
    }

    /// Restore the retained snapshot without taking the lock; callers hold it.
    async fn restore_current(&self) -> Result<RepoSnapshot> {
        let snapshot = self
            .current_snapshot()
            .await?
            .ok_or(AppError::NoBackupAvailable)?;

        let exclude = self.vcs.metadata_dir().to_string();
        let to_restore = snapshot.clone();
        tokio::task::spawn_blocking(move || snapshot::restore(&to_restore, &exclude))
            .await
            .map_err(|e| AppError::Internal(format!("Restore task panicked: {e}")))??;
        self.write_record(snapshot.release_record.as_ref()).await?;

        tracing::info!(snapshot = %snapshot.path.display(), "Working tree restored from snapshot");
        Ok(snapshot)
    }

    /// Restore the tree from the retained snapshot on demand.
    pub async fn rollback(&self) -> Result<RepoSnapshot> {
        let _guard = self.lock.try_acquire()?;
        self.restore_current().await
    }

    /// Rewrite one file of the tree under the tree lock.
    ///
    /// Returns `false` without writing when the file does not exist.
    pub async fn update_tree_file<F>(&self, relative: &str, edit: F) -> Result<bool>
    where
        F: FnOnce(&str) -> String,
    {
        let _guard = self.lock.try_acquire()?;
        let path = self.tree.join(relative);
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let updated = edit(&current);
        if updated != current {
            write_atomic(&path, updated.as_bytes()).await?;
            tracing::info!(file = %path.display(), "Updated file in working tree");
        }
        Ok(true)
    }

    /// Read-only view of the tree.
    pub async fn status(&self) -> Result<RepoStatus> {
        let exists = self.tree.is_dir();
        let is_repository = exists && self.vcs.is_repository(&self.tree);

        let (has_uncommitted_changes, current_branch, last_commit_summary) = if is_repository {
            (
                self.vcs.has_changes(&self.tree).await?,
                self.vcs.current_branch(&self.tree).await?,
                self.vcs.head_summary(&self.tree).await?,
            )
        } else {
            (false, None, None)
        };
        let release_record = self.release_record().await?;
        let current_ref = release_record
            .as_ref()
            .map(|r| r.tag.clone())
            .or_else(|| current_branch.clone());

        Ok(RepoStatus {
            exists,
            is_repository,
            has_uncommitted_changes,
            current_ref,
            current_branch,
            last_commit_summary,
            release_record,
        })
    }

    /// Stage, commit and push every change in the tree.
    ///
    /// A failed push keeps the local commit and is reported as `PublishFailed`.
    pub async fn publish(&self, message: Option<&str>) -> Result<PublishOutcome> {
        let _guard = self.lock.try_acquire()?;

        if !self.vcs.has_changes(&self.tree).await? {
            tracing::info!("Nothing to publish");
            return Err(AppError::NothingToPublish);
        }

        let message = message
            .map(str::to_string)
            .unwrap_or_else(default_commit_message);

        self.vcs.add_all(&self.tree).await?;
        let commit_id = self.vcs.commit(&self.tree, &message).await?;
        tracing::info!(commit = %commit_id, "Committed working tree changes");

        self.vcs.push(&self.tree).await.map_err(|e| {
            tracing::error!(commit = %commit_id, error = %e, "Push failed, local commit kept");
            AppError::PublishFailed(e.to_string())
        })?;

        tracing::info!(commit = %commit_id, "Published");
        Ok(PublishOutcome { commit_id, message })
    }
}

fn default_commit_message() -> String {
    format!(
        "chore: sync working tree ({})",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}
