//! Per-branch commit strategies.
//!
//! A branch is committed either by pushing from the local checkout
//! ([`CommitStrategy::DirectPush`], retried without limit on conflicts) or
//! through GitHub's `createCommitOnBranch` mutation
//! ([`CommitStrategy::AtomicApiCommit`], at most
//! [`API_COMMIT_ATTEMPTS`] tries against a moving head).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use github_gateway::{Credential, FileAddition, GitHub};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{Result, SyncError};
use crate::git::{remote_url, CommitIdentity, GitClient, GitError, CONFLICT_PAUSE};

/// Attempts made by the atomic API commit before giving up.
pub const API_COMMIT_ATTEMPTS: u32 = 3;

/// How a branch's changes reach the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommitStrategy {
    /// `git commit` + `git push` with conflict convergence
    DirectPush,
    /// GraphQL commit guarded by the expected head oid
    AtomicApiCommit,
}

impl CommitStrategy {
    /// Installation credentials commit through the API; anything else pushes.
    pub fn for_credential(credential: &Credential) -> Self {
        if credential.is_installation() {
            CommitStrategy::AtomicApiCommit
        } else {
            CommitStrategy::DirectPush
        }
    }
}

/// One branch checkout to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTarget {
    /// `owner/repo`
    pub repository: String,
    pub branch: String,
    pub directory: PathBuf,
}

impl CommitTarget {
    pub fn organization(&self) -> &str {
        self.repository
            .split_once('/')
            .map_or(self.repository.as_str(), |(org, _)| org)
    }
}

/// What a successful branch commit did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitReceipt {
    Pushed { attempts: u32 },
    Committed { oid: String },
    Unchanged,
}

impl fmt::Display for CommitReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitReceipt::Pushed { attempts } => write!(f, "pushed after {attempts} attempt(s)"),
            CommitReceipt::Committed { oid } => write!(f, "committed {oid}"),
            CommitReceipt::Unchanged => f.write_str("no changes"),
        }
    }
}

/// Commits one branch checkout.
#[async_trait]
pub trait BranchCommitter: Send + Sync {
    async fn commit_branch(
        &self,
        target: &CommitTarget,
        credential: &Credential,
        strategy: CommitStrategy,
    ) -> Result<CommitReceipt>;
}

/// [`BranchCommitter`] backed by the `git` CLI and the GitHub GraphQL API.
pub struct GitHubCommitter {
    git: GitClient,
    github: GitHub,
    git_base_url: String,
    identity: CommitIdentity,
    conflict_pause: Duration,
}

impl GitHubCommitter {
    pub fn new(git: GitClient, github: GitHub, git_base_url: &str, identity: CommitIdentity) -> Self {
        Self {
            git,
            github,
            git_base_url: git_base_url.to_string(),
            identity,
            conflict_pause: CONFLICT_PAUSE,
        }
    }

    /// Pause between atomic-commit attempts after a head mismatch.
    pub fn with_conflict_pause(mut self, pause: Duration) -> Self {
        self.conflict_pause = pause;
        self
    }

    async fn commit_through_api(
        &self,
        target: &CommitTarget,
        credential: &Credential,
        remote: &str,
    ) -> Result<CommitReceipt> {
        let changed = self.git.find_changed_files(&target.directory).await?;
        if changed.is_empty() {
            return Ok(CommitReceipt::Unchanged);
        }

        let dir = target.directory.clone();
        let additions = self
            .git
            .gate()
            .run_fs(move || {
                changed
                    .iter()
                    .map(|rel| Ok(FileAddition::from_bytes(rel.clone(), &std::fs::read(dir.join(rel))?)))
                    .collect::<std::io::Result<Vec<_>>>()
            })
            .await?;

        for attempt in 1..=API_COMMIT_ATTEMPTS {
            let head = self
                .git
                .get_remote_head(&target.directory, &target.branch, remote)
                .await?;
            let created = self
                .github
                .create_commit_on_branch(
                    credential,
                    &target.repository,
                    &target.branch,
                    &head,
                    &self.identity.message,
                    &additions,
                )
                .await;

            match created {
                Ok(commit) => {
                    if let Err(err) = self.resync(target, remote).await {
                        warn!(directory = %target.directory.display(), error = %err, "post-commit resync failed");
                    }
                    return Ok(CommitReceipt::Committed { oid: commit.oid });
                }
                Err(err) if err.is_head_mismatch() => {
                    warn!(
                        repo = %target.repository,
                        branch = %target.branch,
                        attempt,
                        "branch head moved during commit"
                    );
                    if attempt < API_COMMIT_ATTEMPTS {
                        if let Err(err) = self.resync(target, remote).await {
                            warn!(directory = %target.directory.display(), error = %err, "resync after head mismatch failed");
                        }
                        tokio::time::sleep(self.conflict_pause).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(SyncError::HeadConflict {
            attempts: API_COMMIT_ATTEMPTS,
        })
    }

    async fn resync(&self, target: &CommitTarget, remote: &str) -> Result<()> {
        match self
            .git
            .force_refetch(&target.directory, &target.branch, remote)
            .await
        {
            Ok(()) | Err(GitError::Conflict(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl BranchCommitter for GitHubCommitter {
    async fn commit_branch(
        &self,
        target: &CommitTarget,
        credential: &Credential,
        strategy: CommitStrategy,
    ) -> Result<CommitReceipt> {
        let remote = remote_url(&self.git_base_url, &target.repository, Some(credential.secret()));
        debug!(directory = %target.directory.display(), strategy = ?strategy, "committing branch");

        match strategy {
            CommitStrategy::DirectPush => {
                // Always push: a clean tree may still hold an unpushed commit
                // from an earlier attempt whose push failed.
                let attempts = self
                    .git
                    .commit_and_push(&target.directory, &target.branch, &remote, &self.identity)
                    .await?;
                Ok(CommitReceipt::Pushed { attempts })
            }
            CommitStrategy::AtomicApiCommit => {
                self.commit_through_api(target, credential, &remote).await
            }
        }
    }
}
