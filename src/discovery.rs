//! Repository discovery abstraction layer
//!
//! The remote platform is reached through the [`RepositoryHost`] trait, which
//! only knows how to resolve the authenticated login and return one page of
//! the repositories visible to it. [`list_owned_repositories`] walks every
//! page and keeps the repositories owned by the configured accounts.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One repository as reported by the remote platform.
///
/// Two values are the same repository when their names match and their
/// owners match ignoring case.
#[derive(Debug, Clone)]
pub struct RemoteRepository {
    /// Owner login (e.g., "octocat")
    pub owner: String,

    /// Repository name (e.g., "hello-world")
    pub name: String,
}

impl RemoteRepository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Get display name (owner/name format)
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Where the bare mirror of this repository lives under `root`
    pub fn mirror_path(&self, root: &Path) -> Result<PathBuf> {
        for part in [&self.owner, &self.name] {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => {}
                _ => {
                    return Err(anyhow!(
                        "Refusing to mirror {}: {:?} is not a plain path component",
                        self.full_name(),
                        part
                    ))
                }
            }
        }

        Ok(root.join(&self.owner).join(&self.name))
    }

    /// Check whether `owners` (lower-cased) contains this repository's owner
    pub fn is_owned_by_any(&self, owners: &BTreeSet<String>) -> bool {
        owners.contains(&self.owner.to_lowercase())
    }
}

impl PartialEq for RemoteRepository {
    fn eq(&self, other: &Self) -> bool {
        self.owner.eq_ignore_ascii_case(&other.owner) && self.name == other.name
    }
}

impl Eq for RemoteRepository {}

impl Hash for RemoteRepository {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.to_ascii_lowercase().hash(state);
        self.name.hash(state);
    }
}

/// One page of the repository listing
#[derive(Debug, Clone, Default)]
pub struct RepositoryPage {
    pub repositories: Vec<RemoteRepository>,

    /// Page number to request next, `None` on the last page
    pub next_page: Option<u32>,
}

/// Trait for the remote platform the repositories are listed from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Login of the identity the access token belongs to
    async fn authenticated_login(&self) -> Result<String>;

    /// Fetch one page (1-based) of the repositories visible to that identity
    async fn list_page(&self, page: u32) -> Result<RepositoryPage>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}

/// Result of listing the repositories of the configured owners
#[derive(Debug, Clone)]
pub struct OwnedRepositories {
    /// Authenticated login, needed to build clone credentials
    pub login: String,

    /// Repositories owned by a configured owner, in listing order
    pub repositories: Vec<RemoteRepository>,

    /// Number of repositories visible before filtering
    pub total_listed: usize,
}

/// Keep the repositories whose owner is in `owners`, preserving order
pub fn filter_by_owner(
    repositories: Vec<RemoteRepository>,
    owners: &BTreeSet<String>,
) -> Vec<RemoteRepository> {
    repositories
        .into_iter()
        .filter(|repo| repo.is_owned_by_any(owners))
        .collect()
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    what: &str,
    request: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow!("{} interrupted by shutdown", what)),
        result = request => result,
    }
}

/// Resolve the login, list every page and filter by owner
pub async fn list_owned_repositories(
    host: &dyn RepositoryHost,
    owners: &BTreeSet<String>,
    cancel: &CancellationToken,
) -> Result<OwnedRepositories> {
    let login = until_cancelled(cancel, "identity lookup", host.authenticated_login())
        .await
        .with_context(|| format!("Failed to resolve the authenticated {} user", host.provider_name()))?;

    info!("Using {} user: {}", host.provider_name(), login);
    info!("Loading repositories...");

    let mut all_repositories = Vec::new();
    let mut page = 1u32;

    loop {
        let result = until_cancelled(cancel, "repository listing", host.list_page(page))
            .await
            .with_context(|| format!("Failed to fetch repositories page {}", page))?;

        debug!("Page {} returned {} repositories", page, result.repositories.len());
        all_repositories.extend(result.repositories);

        match result.next_page {
            Some(next) if next > page => page = next,
            Some(next) => {
                return Err(anyhow!(
                    "Repository listing did not advance: page {} points back to page {}",
                    page,
                    next
                ))
            }
            None => break,
        }
    }

    let total_listed = all_repositories.len();
    info!("Found {} repositories", total_listed);
    info!("Filtering repositories by owner: {:?}", owners);

    let repositories = filter_by_owner(all_repositories, owners);
    info!("Found {} repositories after filtering", repositories.len());

    Ok(OwnedRepositories {
        login,
        repositories,
        total_listed,
    })
}
