use anyhow::{Context, Result};
use async_trait::async_trait;
use octocrab::{Octocrab, Page};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::discovery::{RemoteRepository, RepositoryHost, RepositoryPage};

/// GitHub caps `per_page` at 100
const PAGE_SIZE: u8 = 100;

/// GitHub client wrapper authenticated with the configured access token
pub struct GitHubClient {
    client: Octocrab,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    owner: ApiOwner,
}

#[derive(Debug, Serialize)]
struct ListParams {
    per_page: u8,
    page: u32,
}

impl GitHubClient {
    /// Create a new GitHub client from the configured token and API endpoint
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(config.token.clone());

        if let Some(api_url) = &config.github.api_url {
            info!("Using GitHub API at {}", api_url);
            builder = builder
                .base_uri(api_url.as_str())
                .with_context(|| format!("Invalid GitHub API URL: {}", api_url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn authenticated_login(&self) -> Result<String> {
        let user: ApiUser = self
            .client
            .get("/user", None::<&()>)
            .await
            .context("Failed to get current user information. Check your access token.")?;

        Ok(user.login)
    }

    async fn list_page(&self, page: u32) -> Result<RepositoryPage> {
        debug!("Fetching repositories page {}", page);

        let params = ListParams {
            per_page: PAGE_SIZE,
            page,
        };
        let response: Page<ApiRepository> = self
            .client
            .get("/user/repos", Some(&params))
            .await
            .with_context(|| format!("GitHub API rejected repositories page {}", page))?;

        let next_page = response.next.as_ref().map(|_| page + 1);
        let repositories = response
            .items
            .into_iter()
            .map(|repo| RemoteRepository::new(repo.owner.login, repo.name))
            .collect();

        Ok(RepositoryPage {
            repositories,
            next_page,
        })
    }

    fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}
