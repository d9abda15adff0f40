use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

pub const ENV_OWNERS: &str = "GITHUB_BACKUP_OWNERS";
pub const ENV_TOKEN: &str = "GITHUB_BACKUP_TOKEN";
pub const ENV_DIRECTORY: &str = "GITHUB_BACKUP_DIRECTORY";
pub const ENV_CONCURRENCY: &str = "GITHUB_BACKUP_CONCURRENCY";
pub const ENV_PERIOD_SECONDS: &str = "GITHUB_BACKUP_PERIOD_SECONDS";
pub const ENV_API_URL: &str = "GITHUB_BACKUP_API_URL";
pub const ENV_GIT_URL: &str = "GITHUB_BACKUP_GIT_URL";

/// Main configuration structure, resolved once at startup and never mutated
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Owner logins whose repositories are backed up (lower-cased)
    pub owners: BTreeSet<String>,

    /// Access token used for the API and for git transport
    pub token: String,

    /// Root directory holding `<owner>/<name>` mirrors
    pub directory: PathBuf,

    /// Accepted for compatibility; repositories are synchronized sequentially
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds to wait between two backup passes
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u64,

    /// GitHub endpoints
    #[serde(default)]
    pub github: GitHubConfig,
}

/// GitHub endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    /// REST API base URL (api.github.com when unset)
    pub api_url: Option<String>,

    /// Base URL repositories are cloned from
    #[serde(default = "default_git_url")]
    pub git_url: String,
}

fn default_concurrency() -> usize {
    10
}
fn default_period_seconds() -> u64 {
    86400
}
fn default_git_url() -> String {
    "https://github.com".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            git_url: default_git_url(),
        }
    }
}

// The token must never reach a log line, so Debug is written by hand.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("owners", &self.owners)
            .field("token", &"<redacted>")
            .field("directory", &self.directory)
            .field("concurrency", &self.concurrency)
            .field("period_seconds", &self.period_seconds)
            .field("github", &self.github)
            .finish()
    }
}

/// Check a GitHub user or organization name
pub fn is_valid_owner_name(name: &str) -> bool {
    static OWNER_NAME: OnceLock<Regex> = OnceLock::new();
    OWNER_NAME
        .get_or_init(|| Regex::new(r"^[-.\w]*$").expect("owner name pattern is valid"))
        .is_match(name)
}

/// Turn raw owner names into the normalised owner set.
///
/// Names are trimmed and lower-cased; empty entries are skipped and invalid
/// ones are dropped with a warning.
pub fn parse_owners<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut owners = BTreeSet::new();
    for raw_owner in raw {
        let owner = raw_owner.as_ref().trim();
        if owner.is_empty() {
            continue;
        }
        if !is_valid_owner_name(owner) {
            warn!("Ignoring invalid owner: {}", owner);
            continue;
        }
        owners.insert(owner.to_lowercase());
    }
    owners
}

impl Config {
    /// Load configuration from the `GITHUB_BACKUP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let raw_owners = var(ENV_OWNERS).ok_or_else(|| anyhow!("{} is not set", ENV_OWNERS))?;
        let token = var(ENV_TOKEN).ok_or_else(|| anyhow!("{} is not set", ENV_TOKEN))?;
        let directory = var(ENV_DIRECTORY).ok_or_else(|| anyhow!("{} is not set", ENV_DIRECTORY))?;

        let concurrency = match var(ENV_CONCURRENCY) {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("{} is not a number", ENV_CONCURRENCY))?,
            None => default_concurrency(),
        };

        let period_seconds = match var(ENV_PERIOD_SECONDS) {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("{} is not a number", ENV_PERIOD_SECONDS))?,
            None => default_period_seconds(),
        };

        let mut config = Self {
            owners: parse_owners(raw_owners.split(',')),
            token,
            directory: PathBuf::from(directory),
            concurrency,
            period_seconds,
            github: GitHubConfig {
                api_url: var(ENV_API_URL),
                git_url: var(ENV_GIT_URL).unwrap_or_else(default_git_url),
            },
        };

        config.normalize()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.owners = parse_owners(&config.owners);
        config.normalize()?;

        Ok(config)
    }

    /// Expand the root directory and enforce the startup invariants
    fn normalize(&mut self) -> Result<()> {
        let directory = self.directory.to_string_lossy().into_owned();
        self.directory = PathBuf::from(
            shellexpand::full(&directory)
                .context("Failed to expand backup directory path")?
                .as_ref(),
        );
        self.token = self.token.trim().to_string();

        if self.owners.is_empty() {
            bail!("No owners set");
        }
        if self.token.is_empty() {
            bail!("Access token is empty");
        }
        if self.directory.as_os_str().is_empty() {
            bail!("Backup directory is empty");
        }
        if self.concurrency == 0 {
            bail!("Concurrency must be greater than zero");
        }
        if self.period_seconds == 0 {
            bail!("Backup period must be greater than zero");
        }

        Ok(())
    }

    /// Interval between two passes
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }
}
