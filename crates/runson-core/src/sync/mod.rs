//! Multi-repository synchronization.
//!
//! - `host`: repository discovery seam
//! - `commit`: per-branch commit strategies
//! - `orchestrator`: the bulk fetch/edit engine

pub mod commit;
pub mod host;
pub mod orchestrator;

pub use commit::{
    BranchCommitter, CommitReceipt, CommitStrategy, CommitTarget, GitHubCommitter,
    API_COMMIT_ATTEMPTS,
};
pub use host::RepositoryHost;
pub use orchestrator::SyncOrchestrator;
