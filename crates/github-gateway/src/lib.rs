//! GitHub gateway for runson
//!
//! This crate is the boundary between runson and GitHub's HTTP APIs:
//! generic REST/GraphQL execution with status-based retries, GitHub
//! discovery and atomic-commit operations, and the installation-token cache.
//!
//! Git transport (clone/push) lives in `runson-core`; nothing here spawns
//! processes.

pub mod client;
pub mod credential;
pub mod error;
pub mod github;
pub mod token;

pub use client::{default_retry_statuses, ApiClient, ApiClientConfig, RestRequest};
pub use credential::{Credential, INSTALLATION_TOKEN_PREFIX, PERSONAL_TOKEN_PREFIX};
pub use error::{ApiError, Result};
pub use github::{CreatedCommit, FileAddition, GitHub, GitHubEndpoints, RemoteRepository, PAGE_SIZE};
pub use token::{
    Clock, InstallationTokenSource, SystemClock, TokenCache, TokenMode, TokenProviderClient,
    INSTALLATION_TOKEN_VALIDITY_SECS,
};
