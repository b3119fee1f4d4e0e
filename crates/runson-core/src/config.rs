//! Runtime configuration.
//!
//! [`SyncConfig::default`] reads the process environment; every field can be
//! overridden afterwards (the CLI maps flags onto it).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Result, SyncError};
use crate::gate::{DEFAULT_FS_LIMIT, DEFAULT_PROCESS_LIMIT};
use crate::git::CommitIdentity;

pub const DEFAULT_STORAGE_ROOT: &str = "/tmp";
pub const DEFAULT_GIT_BASE_URL: &str = "https://github.com";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_COMMIT_AUTHOR: &str = "runson";
pub const DEFAULT_COMMIT_EMAIL: &str = "runson-bot@users.noreply.github.com";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Bulk workflow update via runson [skip ci]";
pub const DEFAULT_RUNS_ON_LABELS: &str = "ubuntu-latest,ubuntu-24.04,ubuntu-22.04,self-hosted";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Settings for the sync engine.
#[derive(Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root of the `<org>/<repo>/<branch>` checkout tree
    pub storage_root: PathBuf,
    pub fs_concurrency_limit: usize,
    pub process_concurrency_limit: usize,
    /// Base for remote URLs; `file://` is accepted for local mirrors
    pub git_base_url: String,
    pub github_api_url: String,
    pub github_graphql_url: Option<String>,
    #[serde(skip_serializing, default)]
    pub personal_access_token: Option<String>,
    pub installation_token_provider: Option<String>,
    #[serde(skip_serializing, default)]
    pub installation_token_provider_secret: Option<String>,
    pub installation_id: Option<u64>,
    pub commit_author: String,
    pub commit_email: String,
    pub commit_message: String,
    /// Runner labels offered to operators
    pub predefined_labels: Vec<String>,
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(env_or("REPO_STORAGE", DEFAULT_STORAGE_ROOT)),
            fs_concurrency_limit: env_parse("FS_CONCURRENCY_LIMIT", DEFAULT_FS_LIMIT),
            process_concurrency_limit: env_parse("SHELL_CONCURRENCY_LIMIT", DEFAULT_PROCESS_LIMIT),
            git_base_url: env_or("GIT_BASE_URL", DEFAULT_GIT_BASE_URL),
            github_api_url: env_or("GITHUB_API_URL", DEFAULT_GITHUB_API_URL),
            github_graphql_url: env_opt("GITHUB_GRAPHQL_URL"),
            personal_access_token: env_opt("GITHUB_PERSONAL_ACCESS_TOKEN"),
            installation_token_provider: env_opt("GITHUB_INSTALLATION_TOKEN_PROVIDER"),
            installation_token_provider_secret: env_opt("GITHUB_INSTALLATION_TOKEN_PROVIDER_SECRET"),
            installation_id: env_opt("GITHUB_INSTALLATION_ID").and_then(|v| v.parse().ok()),
            commit_author: env_or("COMMIT_AUTHOR", DEFAULT_COMMIT_AUTHOR),
            commit_email: env_or("COMMIT_EMAIL", DEFAULT_COMMIT_EMAIL),
            commit_message: env_or("COMMIT_MESSAGE", DEFAULT_COMMIT_MESSAGE),
            predefined_labels: split_labels(&env_or("PREDEFINED_RUNS_ON_LABELS", DEFAULT_RUNS_ON_LABELS)),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Check that some way of obtaining a credential is configured.
    pub fn validate(&self) -> Result<()> {
        if self.personal_access_token.is_some() {
            return Ok(());
        }
        match (
            &self.installation_token_provider,
            &self.installation_token_provider_secret,
            self.installation_id,
        ) {
            (Some(_), Some(_), Some(_)) => Ok(()),
            (None, _, _) => Err(SyncError::Config(
                "set GITHUB_PERSONAL_ACCESS_TOKEN or GITHUB_INSTALLATION_TOKEN_PROVIDER".into(),
            )),
            (Some(_), None, _) => Err(SyncError::Config(
                "GITHUB_INSTALLATION_TOKEN_PROVIDER_SECRET is required with a token provider".into(),
            )),
            (Some(_), Some(_), None) => Err(SyncError::Config(
                "GITHUB_INSTALLATION_ID is required with a token provider".into(),
            )),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn commit_identity(&self) -> CommitIdentity {
        CommitIdentity {
            author: self.commit_author.clone(),
            email: self.commit_email.clone(),
            message: self.commit_message.clone(),
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("storage_root", &self.storage_root)
            .field("fs_concurrency_limit", &self.fs_concurrency_limit)
            .field("process_concurrency_limit", &self.process_concurrency_limit)
            .field("git_base_url", &self.git_base_url)
            .field("github_api_url", &self.github_api_url)
            .field("github_graphql_url", &self.github_graphql_url)
            .field("personal_access_token", &self.personal_access_token.as_ref().map(|_| "<redacted>"))
            .field("installation_token_provider", &self.installation_token_provider)
            .field("installation_id", &self.installation_id)
            .field("commit_author", &self.commit_author)
            .field("commit_email", &self.commit_email)
            .field("predefined_labels", &self.predefined_labels)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Split a comma-separated label list, dropping blanks.
pub fn split_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
