//! The user's own outgoing review repository

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::git::{git_output, run_git};
use super::layout::REVIEWS_DIR;
use crate::error::PublishError;

/// Result of one commit-and-push attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Changes are visible to peers
    Pushed,
    /// Committed, but there is no remote to push to
    LocalOnly,
    /// The remote refused the push (typically it moved ahead)
    Rejected(String),
}

#[async_trait]
pub trait OutgoingRepository: Send + Sync {
    /// Working tree where record files are staged
    fn root(&self) -> &Path;

    /// Commit staged record files and publish them
    async fn commit_and_push(&self, message: &str) -> Result<PushOutcome, PublishError>;

    /// Bring the working tree up to date with the remote after a rejection
    async fn refresh(&self) -> Result<(), PublishError>;
}

fn repository_error(e: anyhow::Error) -> PublishError {
    PublishError::Repository(format!("{e:#}"))
}

/// A git working copy, optionally with an `origin` remote
#[derive(Debug, Clone)]
pub struct GitRepository {
    dir: PathBuf,
    timeout: Duration,
}

impl GitRepository {
    pub fn new(dir: PathBuf, timeout: Duration) -> Self {
        Self { dir, timeout }
    }

    /// Clone `url` into `dir`, or initialize an empty repository without a remote
    pub async fn setup(
        dir: PathBuf,
        url: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        if dir.join(".git").exists() {
            debug!("Review repository already present at {}", dir.display());
            return Ok(Self::new(dir, timeout));
        }

        let parent = dir.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        let dir_str = dir.to_string_lossy().into_owned();
        match url {
            Some(url) => {
                info!("Cloning review repository {}", url);
                run_git(parent, &["clone", "--quiet", url, dir_str.as_str()], timeout).await?;
            }
            None => {
                info!("Initializing local review repository at {}", dir.display());
                run_git(parent, &["init", "--quiet", dir_str.as_str()], timeout).await?;
            }
        }
        Ok(Self::new(dir, timeout))
    }

    async fn has_remote(&self) -> Result<bool, PublishError> {
        let remotes = run_git(&self.dir, &["remote"], self.timeout)
            .await
            .map_err(repository_error)?;
        Ok(remotes.lines().any(|r| r.trim() == "origin"))
    }

    /// Identity flags for commits when the user has none configured
    async fn identity_args(&self) -> Vec<&'static str> {
        let configured = git_output(&self.dir, &["config", "user.email"], self.timeout)
            .await
            .is_ok_and(|o| o.success && !o.stdout.is_empty());
        if configured {
            Vec::new()
        } else {
            vec!["-c", "user.name=vouch", "-c", "user.email=vouch@localhost"]
        }
    }
}

#[async_trait]
impl OutgoingRepository for GitRepository {
    fn root(&self) -> &Path {
        &self.dir
    }

    async fn commit_and_push(&self, message: &str) -> Result<PushOutcome, PublishError> {
        run_git(&self.dir, &["add", "--all", "--", REVIEWS_DIR], self.timeout)
            .await
            .map_err(repository_error)?;

        let staged = git_output(&self.dir, &["diff", "--cached", "--quiet"], self.timeout)
            .await
            .map_err(repository_error)?;
        if !staged.success {
            let mut args: Vec<&str> = self.identity_args().await;
            args.extend(["commit", "--quiet", "-m", message]);
            run_git(&self.dir, &args, self.timeout)
                .await
                .map_err(repository_error)?;
            debug!("Committed reviews in {}", self.dir.display());
        }

        if !self.has_remote().await? {
            return Ok(PushOutcome::LocalOnly);
        }

        let push = git_output(&self.dir, &["push", "--quiet", "origin", "HEAD"], self.timeout)
            .await
            .map_err(repository_error)?;
        if push.success {
            Ok(PushOutcome::Pushed)
        } else {
            Ok(PushOutcome::Rejected(push.stderr))
        }
    }

    async fn refresh(&self) -> Result<(), PublishError> {
        let mut args: Vec<&str> = self.identity_args().await;
        args.extend(["pull", "--quiet", "--rebase", "origin", "HEAD"]);
        run_git(&self.dir, &args, self.timeout)
            .await
            .map_err(repository_error)?;
        Ok(())
    }
}

/// A plain directory; writing the files is publishing them
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    dir: PathBuf,
}

impl DirectoryRepository {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl OutgoingRepository for DirectoryRepository {
    fn root(&self) -> &Path {
        &self.dir
    }

    async fn commit_and_push(&self, _message: &str) -> Result<PushOutcome, PublishError> {
        Ok(PushOutcome::Pushed)
    }

    async fn refresh(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[tokio::test]
    async fn test_local_repository_commits_without_remote() {
        if !git_available() {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("repo");
        let repo = GitRepository::setup(dir.clone(), None, Duration::from_secs(30))
            .await
            .unwrap();

        let file = dir.join("reviews/npm/d3/4.10.0/x.json");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "{}").unwrap();

        let outcome = repo.commit_and_push("Add reviews").await.unwrap();
        assert_eq!(outcome, PushOutcome::LocalOnly);

        let log = run_git(&dir, &["log", "--oneline"], Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_push_to_bare_remote() {
        if !git_available() {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let remote = temp_dir.path().join("remote.git");
        run_git(
            temp_dir.path(),
            &["init", "--quiet", "--bare", remote.to_str().unwrap()],
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        let dir = temp_dir.path().join("work");
        let repo = GitRepository::setup(
            dir.clone(),
            Some(remote.to_str().unwrap()),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        let file = dir.join("reviews/npm/d3/4.10.0/x.json");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "{}").unwrap();

        assert_eq!(
            repo.commit_and_push("Add reviews").await.unwrap(),
            PushOutcome::Pushed
        );
    }
}
