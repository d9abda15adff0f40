//! github-backup - Unattended mirror backups of GitHub repositories
//!
//! The daemon periodically lists every repository visible to an access token,
//! keeps those owned by the configured accounts, and maintains a bare mirror of
//! each one under `<directory>/<owner>/<name>`. The mirrors themselves are the
//! only state: a valid bare repository is fetched and pruned, anything else is
//! cloned afresh.
//!
//! ## Modules
//!
//! - [`config`]: Configuration from environment variables or YAML
//! - [`discovery`]: Repository host abstraction, paging and owner filtering
//! - [`github`]: GitHub implementation of the repository host
//! - [`git`]: Bare mirror clone, fetch and prune
//! - [`sync`]: One backup pass
//! - [`daemon`]: Periodic scheduling and shutdown signals
//! - [`delay`]: Cancellable sleep

pub mod config;
pub mod daemon;
pub mod delay;
pub mod discovery;
pub mod git;
pub mod github;
pub mod sync;

pub use config::Config;
pub use daemon::{Daemon, DaemonStats};
pub use discovery::{OwnedRepositories, RemoteRepository, RepositoryHost, RepositoryPage};
pub use git::{GitClient, Mirror, SyncResult};
pub use github::GitHubClient;
pub use sync::{BackupPass, SyncEngine, SyncSummary};
