use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use git2::{
    Cred, ErrorCode, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature,
    StatusOptions,
};

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::release::{CommitSummary, VersionControlBackend};

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    Ok(())
}

/// Build `PushOptions` that authenticate via credential callback.
///
/// With a token the credentials are HTTPS user/pass; otherwise the SSH agent is used.
/// Rejected ref updates are turned into errors so a refused push never looks successful.
fn make_push_options(token: Option<&str>) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, _allowed_types| match token {
        Some(token) => Cred::userpass_plaintext("x-access-token", token),
        None => Cred::ssh_key_from_agent(username_from_url.unwrap_or("git")),
    });
    callbacks.push_update_reference(|refname, status| match status {
        Some(message) => Err(git2::Error::from_str(&format!(
            "remote rejected {refname}: {message}"
        ))),
        None => Ok(()),
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

/// Open the repository at `dir`, treating "no repository" as `None`.
fn open_optional(dir: &Path) -> Result<Option<Repository>> {
    match Repository::open(dir) {
        Ok(repo) => Ok(Some(repo)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List local tag names.
pub async fn tag_names(dir: &Path) -> Result<Vec<String>> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let Some(repo) = open_optional(&dir)? else {
            return Ok(Vec::new());
        };
        let tags = repo.tag_names(None)?;
        Ok(tags.iter().flatten().map(str::to_string).collect())
    })
    .await
    .map_err(|e| AppError::Git(format!("Tag-list task panicked: {e}")))?
}

/// Stage all changes, including deletions.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-all task panicked: {e}")))?
}

/// Commit with a message. Works on an unborn branch (first commit has no parent).
pub async fn commit(dir: &Path, message: &str, author_name: &str, author_email: &str) -> Result<String> {
    let dir = dir.to_path_buf();
    let message = message.to_string();
    let author_name = author_name.to_string();
    let author_email = author_email.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let sig = Signature::now(&author_name, &author_email)?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
        Ok(short_id(&oid.to_string()))
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Push a branch to the named remote.
pub async fn push(dir: &Path, remote_name: &str, branch_name: &str, token: Option<&str>) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let remote_name = remote_name.to_string();
    let branch_name = branch_name.to_string();
    let token = token.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote(&remote_name)?;
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(token.as_deref());
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

/// Check if there are any staged, unstaged or untracked changes.
pub async fn has_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let Some(repo) = open_optional(&dir)? else {
            return Ok(false);
        };
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    })
    .await
    .map_err(|e| AppError::Git(format!("Has-changes task panicked: {e}")))?
}

/// Summary of the HEAD commit, `None` on an unborn branch or a non-repository.
pub async fn head_summary(dir: &Path) -> Result<Option<CommitSummary>> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let Some(repo) = open_optional(&dir)? else {
            return Ok(None);
        };
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        let author = commit.author();
        let time = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(Some(CommitSummary {
            id: short_id(&commit.id().to_string()),
            author: author.name().unwrap_or_default().to_string(),
            time,
            message: commit.summary().unwrap_or_default().to_string(),
        }))
    })
    .await
    .map_err(|e| AppError::Git(format!("Head-summary task panicked: {e}")))?
}

/// Short name of the checked-out branch.
pub async fn current_branch(dir: &Path) -> Result<Option<String>> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let Some(repo) = open_optional(&dir)? else {
            return Ok(None);
        };
        let branch = match repo.head() {
            Ok(head) => head.shorthand().map(str::to_string),
            // Unborn: HEAD still names the branch symbolically
            Err(e) if e.code() == ErrorCode::UnbornBranch => repo
                .find_reference("HEAD")
                .ok()
                .and_then(|r| r.symbolic_target().map(str::to_string))
                .map(|t| t.trim_start_matches("refs/heads/").to_string()),
            Err(e) => return Err(e.into()),
        };
        Ok(branch)
    })
    .await
    .map_err(|e| AppError::Git(format!("Current-branch task panicked: {e}")))?
}

fn short_id(oid: &str) -> String {
    oid.chars().take(7).collect()
}

/// `VersionControlBackend` over an in-process libgit2 repository.
pub struct Git2Backend {
    metadata_dir: String,
    remote: String,
    branch: String,
    author_name: String,
    author_email: String,
    token: Option<String>,
}

impl Git2Backend {
    pub fn new(config: &WorkspaceConfig, token: Option<&str>) -> Self {
        Self {
            metadata_dir: config.metadata_dir.clone(),
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
            token: token.map(str::to_string),
        }
    }

    fn metadata_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.metadata_dir)
    }
}

#[async_trait]
impl VersionControlBackend for Git2Backend {
    fn metadata_dir(&self) -> &str {
        &self.metadata_dir
    }

    fn is_repository(&self, dir: &Path) -> bool {
        self.metadata_path(dir).exists() && Repository::open(dir).is_ok()
    }

    async fn current_tags(&self, dir: &Path) -> Result<Vec<String>> {
        tag_names(dir).await
    }

    async fn has_changes(&self, dir: &Path) -> Result<bool> {
        has_changes(dir).await
    }

    async fn add_all(&self, dir: &Path) -> Result<()> {
        add_all(dir).await
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<String> {
        commit(dir, message, &self.author_name, &self.author_email).await
    }

    async fn push(&self, dir: &Path) -> Result<()> {
        push(dir, &self.remote, &self.branch, self.token.as_deref()).await
    }

    async fn head_summary(&self, dir: &Path) -> Result<Option<CommitSummary>> {
        head_summary(dir).await
    }

    async fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        current_branch(dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("release/v2.3.0").is_ok());
    }

    #[tokio::test]
    async fn test_non_repository_has_no_tags_or_changes() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("file.txt"), "x").unwrap();

        assert!(tag_names(tmp.path()).await.unwrap().is_empty());
        assert!(!has_changes(tmp.path()).await.unwrap());
        assert!(head_summary(tmp.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_on_unborn_branch_then_tags() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        fs::write(tmp.path().join("hello.txt"), "world").unwrap();

        assert!(has_changes(tmp.path()).await.unwrap());
        add_all(tmp.path()).await.unwrap();
        let id = commit(tmp.path(), "initial", "Test", "test@example.com")
            .await
            .unwrap();
        assert_eq!(id.len(), 7);
        assert!(!has_changes(tmp.path()).await.unwrap());

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.tag_lightweight("v2.3.0", head.as_object(), false).unwrap();
        assert_eq!(tag_names(tmp.path()).await.unwrap(), vec!["v2.3.0".to_string()]);

        let summary = head_summary(tmp.path()).await.unwrap().unwrap();
        assert_eq!(summary.message, "initial");
        assert_eq!(summary.author, "Test");
    }

    #[tokio::test]
    async fn test_add_all_stages_deletions() {
        let tmp = tempfile::tempdir().unwrap();
        Repository::init(tmp.path()).unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        add_all(tmp.path()).await.unwrap();
        commit(tmp.path(), "add a", "Test", "test@example.com").await.unwrap();

        fs::remove_file(tmp.path().join("a.txt")).unwrap();
        assert!(has_changes(tmp.path()).await.unwrap());
        add_all(tmp.path()).await.unwrap();
        commit(tmp.path(), "remove a", "Test", "test@example.com").await.unwrap();
        assert!(!has_changes(tmp.path()).await.unwrap());
    }
}
