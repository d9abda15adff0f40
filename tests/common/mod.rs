//! Common test utilities and helpers for github-backup tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use assert_fs::TempDir;
use async_trait::async_trait;
use github_backup::config::GitHubConfig;
use github_backup::{Config, RemoteRepository, RepositoryHost, RepositoryPage};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run git in `dir` with a fixed identity and return trimmed stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Backup Test")
        .env("GIT_AUTHOR_EMAIL", "backup@example.com")
        .env("GIT_COMMITTER_NAME", "Backup Test")
        .env("GIT_COMMITTER_EMAIL", "backup@example.com")
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Resolve a ref inside a bare repository
pub fn rev_parse(git_dir: &Path, reference: &str) -> Option<String> {
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(git_dir)
        .args(["rev-parse", "--verify", "--quiet", reference])
        .output()
        .expect("Failed to execute git");

    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A directory of bare "remote" repositories served over file://
pub struct Upstream {
    pub temp_dir: TempDir,
}

impl Upstream {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Base URL to configure as `github.git_url`
    pub fn url(&self) -> String {
        format!("file://{}", self.remotes().display())
    }

    fn remotes(&self) -> PathBuf {
        self.temp_dir.path().join("remotes")
    }

    fn work_dir(&self, owner: &str, name: &str) -> PathBuf {
        self.temp_dir.path().join("work").join(owner).join(name)
    }

    pub fn bare_path(&self, owner: &str, name: &str) -> PathBuf {
        self.remotes().join(owner).join(format!("{}.git", name))
    }

    /// Create `owner/name` with one commit on `main`
    pub fn create_repo(&self, owner: &str, name: &str) {
        let work = self.work_dir(owner, name);
        std::fs::create_dir_all(&work).expect("Failed to create work dir");
        git(&work, &["init", "--quiet", "--initial-branch", "main"]);
        git(&work, &["commit", "--quiet", "--allow-empty", "-m", "initial"]);
        git(&work, &["tag", "v1"]);

        let bare = self.bare_path(owner, name);
        std::fs::create_dir_all(bare.parent().unwrap()).expect("Failed to create remotes dir");
        git(
            &work,
            &["clone", "--quiet", "--bare", ".", bare.to_str().unwrap()],
        );
        git(&work, &["remote", "add", "origin", bare.to_str().unwrap()]);
    }

    /// Push a new commit to `branch`
    pub fn commit(&self, owner: &str, name: &str, branch: &str, message: &str) -> String {
        let work = self.work_dir(owner, name);
        let reference = format!("refs/heads/{}", branch);
        let exists = Command::new("git")
            .arg("-C")
            .arg(&work)
            .args(["rev-parse", "--verify", "--quiet", reference.as_str()])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        if exists {
            git(&work, &["checkout", "--quiet", branch]);
        } else {
            git(&work, &["checkout", "--quiet", "-b", branch]);
        }
        git(&work, &["commit", "--quiet", "--allow-empty", "-m", message]);
        git(&work, &["push", "--quiet", "--force", "origin", branch]);
        git(&work, &["rev-parse", "HEAD"])
    }

    pub fn delete_branch(&self, owner: &str, name: &str, branch: &str) {
        let work = self.work_dir(owner, name);
        git(&work, &["checkout", "--quiet", "main"]);
        git(&work, &["push", "--quiet", "origin", "--delete", branch]);
    }
}

/// An HTTP git host that accepts a connection and never answers, so the git
/// command talking to it stays in flight until it is killed
pub struct StalledHost {
    listener: TcpListener,
    pub url: String,
}

impl StalledHost {
    pub async fn bind() -> Self {
        // Callers are #[serial]: the variables keep loopback traffic off any proxy.
        std::env::set_var("no_proxy", "127.0.0.1");
        std::env::set_var("NO_PROXY", "127.0.0.1");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let url = format!("http://{}", listener.local_addr().unwrap());
        Self { listener, url }
    }

    /// Read the first request git sends, then cancel `cancel`.
    ///
    /// The open connection is handed back with the request headers so git
    /// keeps waiting on it.
    pub fn cancel_on_request(self, cancel: CancellationToken) -> JoinHandle<(TcpStream, String)> {
        tokio::spawn(async move {
            let (mut socket, _) = self.listener.accept().await.expect("git never connected");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = socket.read(&mut buf).await.expect("Failed to read request");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            cancel.cancel();
            (socket, String::from_utf8_lossy(&request).into_owned())
        })
    }
}

/// Configuration pointing at a local upstream
pub fn test_config(directory: &Path, git_url: &str, owners: &[&str]) -> Config {
    Config {
        owners: owners.iter().map(|o| o.to_lowercase()).collect::<BTreeSet<_>>(),
        token: "ghp_test_token".to_string(),
        directory: directory.to_path_buf(),
        concurrency: 10,
        period_seconds: 86400,
        github: GitHubConfig {
            api_url: None,
            git_url: git_url.to_string(),
        },
    }
}

/// Repository host returning a fixed listing on a single page
#[derive(Clone)]
pub struct StaticHost {
    repositories: Arc<Mutex<Vec<RemoteRepository>>>,
    pub logins: Arc<AtomicUsize>,
    fail: bool,
}

impl StaticHost {
    pub fn new(repos: &[(&str, &str)]) -> Self {
        Self {
            repositories: Arc::new(Mutex::new(
                repos
                    .iter()
                    .map(|(owner, name)| RemoteRepository::new(*owner, *name))
                    .collect(),
            )),
            logins: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    /// Number of passes that reached the host
    pub fn passes(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryHost for StaticHost {
    async fn authenticated_login(&self) -> Result<String> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("401 Bad credentials"));
        }
        Ok("backup-bot".to_string())
    }

    async fn list_page(&self, _page: u32) -> Result<RepositoryPage> {
        Ok(RepositoryPage {
            repositories: self.repositories.lock().unwrap().clone(),
            next_page: None,
        })
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }
}
