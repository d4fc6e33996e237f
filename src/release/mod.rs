pub mod archive;
pub mod git;
pub mod github;
pub mod lock;
pub mod snapshot;
pub mod synchronizer;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use synchronizer::ReleaseSynchronizer;

/// A release published upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub tag: String,
    pub download_url: String,
    /// Derived from the local tag list on every check; never trusted across checks.
    #[serde(default)]
    pub is_downloaded: bool,
}

impl ReleaseRef {
    pub fn new(tag: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            download_url: download_url.into(),
            is_downloaded: false,
        }
    }
}

/// Result of polling the release source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// The latest release has not been applied locally.
    Available(ReleaseRef),
    /// The latest release tag already exists locally.
    UpToDate(ReleaseRef),
    /// The source could not be queried. Not an error, so polling loops keep going.
    Unreachable { reason: String },
}

impl UpdateCheck {
    pub fn is_available(&self) -> bool {
        matches!(self, UpdateCheck::Available(_))
    }

    pub fn release(&self) -> Option<&ReleaseRef> {
        match self {
            UpdateCheck::Available(r) | UpdateCheck::UpToDate(r) => Some(r),
            UpdateCheck::Unreachable { .. } => None,
        }
    }
}

/// Which release was last applied to the working tree, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub tag: String,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub author: String,
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Read-only view of the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub exists: bool,
    pub is_repository: bool,
    pub has_uncommitted_changes: bool,
    /// Applied release tag, falling back to the checked-out branch.
    pub current_ref: Option<String>,
    pub current_branch: Option<String>,
    pub last_commit_summary: Option<CommitSummary>,
    pub release_record: Option<ReleaseRecord>,
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub commit_id: String,
    pub message: String,
}

/// The hosting provider's release API.
#[async_trait]
pub trait RemoteReleaseSource: Send + Sync {
    /// Latest published release.
    async fn latest_release(&self) -> Result<ReleaseRef>;

    /// Release for an explicit tag. `AppError::ReleaseNotFound` when it does not exist.
    async fn release_by_tag(&self, tag: &str) -> Result<ReleaseRef>;

    /// Download the release payload (a gzipped tarball) into `dest_dir`.
    async fn download_asset(&self, release: &ReleaseRef, dest_dir: &Path) -> Result<PathBuf>;
}

/// Version-control primitives the synchronizer needs.
///
/// Every method takes the working tree path so one backend can serve any tree.
#[async_trait]
pub trait VersionControlBackend: Send + Sync {
    /// Name of the metadata directory inside the tree (e.g. `.git`).
    fn metadata_dir(&self) -> &str;

    fn is_repository(&self, dir: &Path) -> bool;

    /// Tags known locally. An uninitialized tree has none.
    async fn current_tags(&self, dir: &Path) -> Result<Vec<String>>;

    /// Whether anything is staged, modified or untracked (ignored files excluded).
    async fn has_changes(&self, dir: &Path) -> Result<bool>;

    async fn add_all(&self, dir: &Path) -> Result<()>;

    /// Commit the index; returns the short commit id.
    async fn commit(&self, dir: &Path, message: &str) -> Result<String>;

    async fn push(&self, dir: &Path) -> Result<()>;

    async fn head_summary(&self, dir: &Path) -> Result<Option<CommitSummary>>;

    async fn current_branch(&self, dir: &Path) -> Result<Option<String>>;
}
