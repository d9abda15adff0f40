use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command as AsyncCommand;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::RemoteRepository;

/// Result of synchronizing one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// No mirror existed, a fresh mirror clone was made
    Cloned { path: PathBuf },
    /// An existing mirror was fetched and pruned
    Updated { path: PathBuf },
}

impl SyncResult {
    pub fn path(&self) -> &Path {
        match self {
            SyncResult::Cloned { path } | SyncResult::Updated { path } => path,
        }
    }
}

/// Keeps the local mirror of one repository current
#[async_trait]
pub trait Mirror: Send + Sync {
    async fn sync_repository(
        &self,
        cancel: &CancellationToken,
        login: &str,
        repo: &RemoteRepository,
    ) -> Result<SyncResult>;
}

/// Clones are staged here, relative to the backup root, and renamed into
/// place once complete. GitHub logins cannot start with a dot.
const STAGING_DIR: &str = ".staging";

/// Git operations handler maintaining bare mirrors under the backup directory
#[derive(Clone)]
pub struct GitClient {
    root: PathBuf,
    git_url: String,
    token: String,
}

impl GitClient {
    /// Create a new Git client with the given configuration
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.directory.clone(),
            git_url: config.github.git_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    /// URL of a repository; it never carries credentials
    pub fn public_url(&self, repo: &RemoteRepository) -> String {
        format!("{}/{}/{}.git", self.git_url, repo.owner, repo.name)
    }

    /// Environment handing `login` and the access token to git as an
    /// `http.<git_url>/.extraHeader` entry, so they stay out of argv.
    ///
    /// Empty for hosts that are not reached over HTTP(S).
    pub fn credential_env(&self, login: &str) -> Vec<(String, String)> {
        if !(self.git_url.starts_with("https://") || self.git_url.starts_with("http://")) {
            return Vec::new();
        }

        let credentials = STANDARD.encode(format!("{}:{}", login, self.token));
        vec![
            ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
            (
                "GIT_CONFIG_KEY_0".to_string(),
                format!("http.{}/.extraHeader", self.git_url),
            ),
            (
                "GIT_CONFIG_VALUE_0".to_string(),
                format!("Authorization: Basic {}", credentials),
            ),
        ]
    }

    /// Check whether `path` itself is a bare repository.
    ///
    /// The git directory is passed explicitly, so git never searches parent
    /// directories and nothing on disk is modified. `Ok(false)` means git ran
    /// and reported that `path` is not a repository; any other failure is an
    /// error.
    pub async fn is_bare_repository(&self, path: &Path) -> Result<bool> {
        if !path.is_dir() {
            return Ok(false);
        }

        let output = AsyncCommand::new("git")
            .arg("--git-dir")
            .arg(path)
            .args(["rev-parse", "--is-bare-repository"])
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run git rev-parse in {}", path.display()))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim() == "true");
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not a git repository") {
            return Ok(false);
        }

        Err(anyhow!(
            "git rev-parse failed in {} ({}): {}",
            path.display(),
            output.status,
            stderr.trim()
        ))
    }

    fn staging_path(&self, repo: &RemoteRepository) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(&repo.owner)
            .join(&repo.name)
    }

    fn git_command(&self, login: &str) -> AsyncCommand {
        let mut command = AsyncCommand::new("git");
        command.envs(self.credential_env(login));
        command
    }

    /// Clone into the staging area, then move the finished mirror to `path`.
    ///
    /// Whatever sits at `path` is only removed after the clone succeeded.
    async fn clone_mirror(
        &self,
        cancel: &CancellationToken,
        login: &str,
        repo: &RemoteRepository,
        path: &Path,
    ) -> Result<()> {
        let staging = self.staging_path(repo);
        remove_path(&staging).await?;
        create_parent(&staging).await?;

        let mut command = self.git_command(login);
        command
            .args(["clone", "--mirror", "--quiet"])
            .arg(self.public_url(repo))
            .arg(&staging);
        self.run_git(cancel, command, "clone").await?;

        if tokio::fs::symlink_metadata(path).await.is_ok() {
            warn!(
                "Replacing incomplete mirror at {} with a fresh clone",
                path.display()
            );
            remove_path(path).await?;
        }

        create_parent(path).await?;
        tokio::fs::rename(&staging, path).await.with_context(|| {
            format!(
                "Failed to move {} to {}",
                staging.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        login: &str,
        repo: &RemoteRepository,
        path: &Path,
    ) -> Result<()> {
        let mut command = self.git_command(login);
        command
            .arg("--git-dir")
            .arg(path)
            .args(["fetch", "--force", "--tags", "--prune", "--quiet"])
            .arg(self.public_url(repo))
            .arg("+refs/heads/*:refs/heads/*");

        // git exits successfully when there is nothing new, so an
        // up-to-date mirror needs no special case here.
        self.run_git(cancel, command, "fetch").await
    }

    async fn prune(&self, cancel: &CancellationToken, path: &Path) -> Result<()> {
        let mut command = AsyncCommand::new("git");
        command.arg("--git-dir").arg(path).arg("prune");
        self.run_git(cancel, command, "prune").await
    }

    /// Run a git command until it exits or `cancel` fires.
    ///
    /// Dropping the pending child on cancellation kills it.
    async fn run_git(
        &self,
        cancel: &CancellationToken,
        mut command: AsyncCommand,
        operation: &str,
    ) -> Result<()> {
        command
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to execute git {}", operation))?;

        let output: Output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(anyhow!("git {} interrupted by shutdown", operation));
            }
            output = child.wait_with_output() => {
                output.with_context(|| format!("Failed to wait for git {}", operation))?
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed ({}): {}",
                operation,
                output.status,
                self.redact(stderr.trim())
            ));
        }

        Ok(())
    }

    fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.token, "***")
        }
    }
}

/// Remove a file or directory tree; a missing path is not an error
async fn remove_path(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to inspect {}", path.display()))
        }
    };

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    removed.with_context(|| format!("Failed to remove {}", path.display()))
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Error creating directory {}", parent.display()))?;
    }
    Ok(())
}

#[async_trait]
impl Mirror for GitClient {
    async fn sync_repository(
        &self,
        cancel: &CancellationToken,
        login: &str,
        repo: &RemoteRepository,
    ) -> Result<SyncResult> {
        let full_name = repo.full_name();
        let path = repo.mirror_path(&self.root)?;

        info!("Backing up {} to {}", full_name, path.display());

        let is_mirror = self
            .is_bare_repository(&path)
            .await
            .with_context(|| format!("Error inspecting mirror of {}", full_name))?;

        if is_mirror {
            info!("Updating repository {}", full_name);
            self.fetch(cancel, login, repo, &path)
                .await
                .with_context(|| format!("Error fetching repository {}", full_name))?;

            info!("Pruning repository {}", full_name);
            self.prune(cancel, &path)
                .await
                .with_context(|| format!("Error pruning repository {}", full_name))?;

            debug!("Mirror of {} is current", full_name);
            Ok(SyncResult::Updated { path })
        } else {
            info!("Cloning repository {}", full_name);
            self.clone_mirror(cancel, login, repo, &path)
                .await
                .with_context(|| format!("Error cloning repository {}", full_name))?;

            Ok(SyncResult::Cloned { path })
        }
    }
}
