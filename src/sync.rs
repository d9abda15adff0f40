//! Sync Engine - Orchestrates one backup pass
//!
//! A pass lists the repositories of the configured owners once, then hands
//! each one to the [`Mirror`] in listing order. A repository that fails is
//! logged and skipped; the rest of the pass carries on. Cancellation stops
//! the pass between repositories and is not reported as a failure.

use crate::config::Config;
use crate::discovery::{list_owned_repositories, RepositoryHost};
use crate::git::{GitClient, Mirror, SyncResult};
use crate::github::GitHubClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Results from a complete backup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Repositories visible to the token
    pub total_listed: usize,
    /// Repositories owned by a configured owner
    pub total_matched: usize,
    pub cloned: usize,
    pub updated: usize,
    pub failed: usize,
    /// The pass stopped early because of cancellation
    pub interrupted: bool,
    pub duration: Duration,
}

impl SyncSummary {
    fn record(&mut self, result: &SyncResult) {
        match result {
            SyncResult::Cloned { .. } => self.cloned += 1,
            SyncResult::Updated { .. } => self.updated += 1,
        }
    }

    /// Repositories the pass actually attempted
    pub fn attempted(&self) -> usize {
        self.cloned + self.updated + self.failed
    }
}

/// Something that can run one backup pass
#[async_trait]
pub trait BackupPass: Send + Sync {
    async fn run_pass(&self, cancel: &CancellationToken) -> Result<SyncSummary>;
}

/// The main sync engine composing the repository host and the mirror
pub struct SyncEngine<H, M> {
    host: H,
    mirror: M,
    owners: BTreeSet<String>,
}

impl SyncEngine<GitHubClient, GitClient> {
    /// Create an engine talking to GitHub and mirroring with git
    pub fn from_config(config: &Config) -> Result<Self> {
        let host = GitHubClient::new(config).context("Failed to create GitHub client")?;
        let mirror = GitClient::new(config);

        if config.concurrency > 1 {
            info!(
                "Concurrency is set to {}, repositories are still synchronized one at a time",
                config.concurrency
            );
        }

        Ok(Self::new(host, mirror, config.owners.clone()))
    }
}

impl<H, M> SyncEngine<H, M>
where
    H: RepositoryHost,
    M: Mirror,
{
    pub fn new(host: H, mirror: M, owners: BTreeSet<String>) -> Self {
        Self {
            host,
            mirror,
            owners,
        }
    }

    /// Run a complete pass: list repositories and mirror each of them
    pub async fn perform(&self, cancel: &CancellationToken) -> Result<SyncSummary> {
        let start_time = Instant::now();
        let mut summary = SyncSummary::default();

        info!("Starting backup pass");

        let listed = match list_owned_repositories(&self.host, &self.owners, cancel).await {
            Ok(listed) => listed,
            Err(e) if cancel.is_cancelled() => {
                info!("Backup pass interrupted while listing repositories: {:#}", e);
                summary.interrupted = true;
                summary.duration = start_time.elapsed();
                return Ok(summary);
            }
            Err(e) => return Err(e.context("Failed to list repositories")),
        };

        summary.total_listed = listed.total_listed;
        summary.total_matched = listed.repositories.len();

        for repo in &listed.repositories {
            if cancel.is_cancelled() {
                info!("Backup pass cancelled before {}", repo.full_name());
                summary.interrupted = true;
                break;
            }

            match self.mirror.sync_repository(cancel, &listed.login, repo).await {
                Ok(result) => {
                    debug!("Mirror of {} at {}", repo.full_name(), result.path().display());
                    summary.record(&result);
                }
                Err(e) if cancel.is_cancelled() => {
                    warn!("Backup of {} interrupted: {:#}", repo.full_name(), e);
                    summary.interrupted = true;
                    break;
                }
                Err(e) => {
                    error!("Error downloading repository {}: {:#}", repo.full_name(), e);
                    summary.failed += 1;
                }
            }
        }

        summary.duration = start_time.elapsed();

        info!(
            "Backup pass finished in {:.2}s: {} listed, {} matched, {} attempted ({} cloned, {} updated, {} failed){}",
            summary.duration.as_secs_f64(),
            summary.total_listed,
            summary.total_matched,
            summary.attempted(),
            summary.cloned,
            summary.updated,
            summary.failed,
            if summary.interrupted { " (interrupted)" } else { "" }
        );

        Ok(summary)
    }
}

#[async_trait]
impl<H, M> BackupPass for SyncEngine<H, M>
where
    H: RepositoryHost,
    M: Mirror,
{
    async fn run_pass(&self, cancel: &CancellationToken) -> Result<SyncSummary> {
        self.perform(cancel).await
    }
}
