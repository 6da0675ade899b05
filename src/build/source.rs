// ABOUTME: Fetches source code into scratch workspaces for builds.
// ABOUTME: The git fetcher shallow-clones the ref, or fetches it directly when it names a commit.

use crate::build::request::SourceLocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("git {operation} failed: {stderr}")]
    Git { operation: String, stderr: String },

    #[error("context root {0} does not exist in the checkout")]
    MissingContext(String),
}

/// Commit the checkout ended up on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: Option<String>,
    pub message: Option<String>,
    pub branch: Option<String>,
    pub author: Option<String>,
}

/// Places a copy of the source at `dest`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceLocation, dest: &Path) -> Result<CommitInfo, SourceError>;
}

/// Fetcher backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCliFetcher {
    git: PathBuf,
}

impl Default for GitCliFetcher {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }
}

impl GitCliFetcher {
    pub fn new(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    async fn git(
        &self,
        operation: &str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<String, SourceError> {
        let mut command = Command::new(&self.git);
        command.args(args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        if !output.status.success() {
            return Err(SourceError::Git {
                operation: operation.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Shallow-fetch `source.reference` into a fresh repository and check
    /// out what it resolved to. Works for commit hashes.
    async fn fetch_reference(
        &self,
        source: &SourceLocation,
        dest: &Path,
    ) -> Result<(), SourceError> {
        if tokio::fs::try_exists(dest).await? {
            tokio::fs::remove_dir_all(dest).await?;
        }
        tokio::fs::create_dir_all(dest).await?;

        self.git("init", &["init", "-q"], Some(dest)).await?;
        self.git(
            "remote add",
            &["remote", "add", "origin", source.url.as_str()],
            Some(dest),
        )
        .await?;
        self.git(
            "fetch",
            &[
                "fetch",
                "--depth",
                "1",
                "origin",
                source.reference.as_str(),
            ],
            Some(dest),
        )
        .await?;
        self.git("checkout", &["checkout", "-q", "FETCH_HEAD"], Some(dest))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for GitCliFetcher {
    async fn fetch(&self, source: &SourceLocation, dest: &Path) -> Result<CommitInfo, SourceError> {
        let dest_str = dest.to_string_lossy();
        debug!(url = %source.url, reference = %source.reference, "cloning source");
        let cloned = self
            .git(
                "clone",
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--single-branch",
                    "--branch",
                    source.reference.as_str(),
                    "--",
                    source.url.as_str(),
                    dest_str.as_ref(),
                ],
                None,
            )
            .await;
        match cloned {
            Ok(_) => {}
            // `--branch` only accepts branches and tags.
            Err(SourceError::Git { stderr, .. }) => {
                debug!(reference = %source.reference, %stderr, "fetching reference directly");
                self.fetch_reference(source, dest).await?;
            }
            Err(e) => return Err(e),
        }

        let log = self
            .git("log", &["log", "-1", "--format=%H%n%an%n%s"], Some(dest))
            .await?;
        let mut lines = log.lines();
        Ok(CommitInfo {
            hash: lines.next().map(str::to_string),
            author: lines.next().map(str::to_string),
            message: lines.next().map(str::to_string),
            branch: Some(source.reference.clone()),
        })
    }
}

/// Scratch directory for one build, removed when dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `root`, creating `root` if needed.
    pub fn create(root: &Path) -> Result<Self, SourceError> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix("mikrocloud-build-")
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the source is checked out inside the workspace.
    pub fn checkout(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    /// Delete the workspace now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<(), SourceError> {
        self.dir.close().map_err(SourceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_removed_on_close() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(&root.path().join("builds")).unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.exists());
        assert!(path.starts_with(root.path().join("builds")));

        workspace.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_git_binary_is_reported() {
        let fetcher = GitCliFetcher::new("/nonexistent/git");
        let dest = tempfile::tempdir().unwrap();
        let source = SourceLocation::new("https://example.com/repo.git", "main");
        let err = fetcher
            .fetch(&source, &dest.path().join("src"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Workspace(_)));
    }

    fn git_in(dir: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?}: {output:?}");
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    /// A repository with two commits on `main`; returns (dir, first, second).
    fn origin_repo() -> Option<(TempDir, String, String)> {
        let available = std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success());
        if !available {
            eprintln!("Skipping test: git not found");
            return None;
        }

        let dir = tempfile::tempdir().unwrap();
        git_in(dir.path(), &["init", "-q"]);
        git_in(dir.path(), &["checkout", "-q", "-b", "main"]);
        git_in(dir.path(), &["config", "uploadpack.allowReachableSHA1InWant", "true"]);
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:3\n").unwrap();
        git_in(dir.path(), &["add", "."]);
        git_in(dir.path(), &["commit", "-q", "-m", "first"]);
        let first = git_in(dir.path(), &["rev-parse", "HEAD"]);
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:3.20\n").unwrap();
        git_in(dir.path(), &["commit", "-q", "-am", "second"]);
        let second = git_in(dir.path(), &["rev-parse", "HEAD"]);
        Some((dir, first, second))
    }

    #[tokio::test]
    async fn branch_reference_is_cloned() {
        let Some((origin, _, second)) = origin_repo() else {
            return;
        };
        let url = format!("file://{}", origin.path().display());
        let dest = tempfile::tempdir().unwrap();

        let commit = GitCliFetcher::default()
            .fetch(&SourceLocation::new(url, "main"), &dest.path().join("src"))
            .await
            .unwrap();
        assert_eq!(commit.hash.as_deref(), Some(second.as_str()));
        assert_eq!(commit.message.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn commit_hash_reference_is_fetched() {
        let Some((origin, first, _)) = origin_repo() else {
            return;
        };
        let url = format!("file://{}", origin.path().display());
        let dest = tempfile::tempdir().unwrap();
        let checkout = dest.path().join("src");

        let commit = GitCliFetcher::default()
            .fetch(&SourceLocation::new(url, first.as_str()), &checkout)
            .await
            .unwrap();
        assert_eq!(commit.hash.as_deref(), Some(first.as_str()));
        assert_eq!(commit.message.as_deref(), Some("first"));
        assert_eq!(
            std::fs::read_to_string(checkout.join("Dockerfile")).unwrap(),
            "FROM alpine:3\n"
        );
    }

    #[tokio::test]
    async fn unknown_reference_is_a_git_error() {
        let Some((origin, _, _)) = origin_repo() else {
            return;
        };
        let url = format!("file://{}", origin.path().display());
        let dest = tempfile::tempdir().unwrap();

        let err = GitCliFetcher::default()
            .fetch(&SourceLocation::new(url, "no-such-branch"), &dest.path().join("src"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Git { .. }), "got {err:?}");
    }
}
