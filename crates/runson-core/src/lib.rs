//! runson core library
//!
//! Clones many GitHub repositories and branches, reads and rewrites the
//! runner labels (`runs-on`) of their workflows, and commits the result back
//! one branch at a time.

pub mod branch_path;
pub mod config;
pub mod domain;
pub mod gate;
pub mod git;
pub mod labels;
pub mod obs;
pub mod scan;
pub mod sync;
pub mod telemetry;

pub use branch_path::{branch_directory, resolve_branch, ROOT_BRANCH};
pub use config::{split_labels, SyncConfig};
pub use domain::{
    decode_edits, EditRecord, EditReport, Outcome, RemoteBranch, Report, Result, SyncError,
    WorkflowFile,
};
pub use gate::{is_descriptor_exhaustion, ConcurrencyGate};
pub use git::{
    converge, redact, remote_url, CommitIdentity, GitClient, GitError, PushAttempt, PushCycle,
    CONFLICT_PAUSE, WORKFLOW_DIR,
};
pub use labels::extract_labels;
pub use obs::BatchSpan;
pub use scan::{find_workflow_files, is_workflow_document};
pub use sync::{
    BranchCommitter, CommitReceipt, CommitStrategy, CommitTarget, GitHubCommitter, RepositoryHost,
    SyncOrchestrator, API_COMMIT_ATTEMPTS,
};
pub use telemetry::init_tracing;

/// runson version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
