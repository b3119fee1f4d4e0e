//! Top-level sync engine.
//!
//! A bulk edit runs Discover -> Clone -> Write -> Group -> Commit -> Aggregate.
//! Discovery failures abort the request; failures of a single clone, write or
//! branch commit are recorded in the returned [`Report`] and never stop their
//! siblings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use github_gateway::{
    ApiClient, ApiClientConfig, Credential, GitHub, GitHubEndpoints, RemoteRepository, TokenCache,
    TokenMode, TokenProviderClient,
};
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::SyncConfig;
use crate::domain::{
    decode_edits, EditRecord, EditReport, Outcome, RemoteBranch, Report, Result, SyncError,
    WorkflowFile,
};
use crate::gate::ConcurrencyGate;
use crate::git::{remote_url, GitClient, WORKFLOW_DIR};
use crate::obs::{
    emit_batch_finished, emit_batch_started, emit_branch_cloned, emit_clone_failed,
    emit_commit_failed, emit_commit_finished, emit_write_failed, BatchSpan,
};
use crate::scan::find_workflow_files;
use crate::sync::commit::{BranchCommitter, CommitStrategy, CommitTarget, GitHubCommitter};
use crate::sync::host::RepositoryHost;

/// Composes discovery, cloning, file writes and commits.
pub struct SyncOrchestrator {
    storage_root: PathBuf,
    git_base_url: String,
    git: GitClient,
    tokens: Arc<TokenCache>,
    host: Arc<dyn RepositoryHost>,
    committer: Arc<dyn BranchCommitter>,
}

impl SyncOrchestrator {
    pub fn new(
        storage_root: PathBuf,
        git_base_url: &str,
        git: GitClient,
        tokens: Arc<TokenCache>,
        host: Arc<dyn RepositoryHost>,
        committer: Arc<dyn BranchCommitter>,
    ) -> Self {
        Self {
            storage_root,
            git_base_url: git_base_url.to_string(),
            git,
            tokens,
            host,
            committer,
        }
    }

    /// Wire the GitHub-backed engine from configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;

        let gate = Arc::new(ConcurrencyGate::new(
            config.fs_concurrency_limit,
            config.process_concurrency_limit,
        ));
        let git = GitClient::new(gate);
        let endpoints =
            GitHubEndpoints::new(&config.github_api_url, config.github_graphql_url.as_deref());
        let github = GitHub::new(endpoints, config.http_timeout())?;
        let tokens = Arc::new(TokenCache::new(token_mode(config)?));
        let committer = GitHubCommitter::new(
            git.clone(),
            github.clone(),
            &config.git_base_url,
            config.commit_identity(),
        );

        Ok(Self::new(
            config.storage_root.clone(),
            &config.git_base_url,
            git,
            tokens,
            Arc::new(github),
            Arc::new(committer),
        ))
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Organizations the configured credential can act on.
    pub async fn list_organizations(&self) -> Result<Vec<String>> {
        let credential = self.credential_for(None).await?;
        self.host
            .list_organizations(&credential)
            .await
            .map_err(SyncError::from_discovery)
    }

    /// Repositories of `org`.
    pub async fn list_repositories(&self, org: &str) -> Result<Vec<RemoteRepository>> {
        let credential = self.credential_for(Some(org)).await?;
        self.host
            .list_repositories(&credential, Some(org))
            .await
            .map_err(SyncError::from_discovery)
    }

    /// Clone every branch of `org` (or of one repository in it).
    ///
    /// Report keys are branch directories for clones and `org/repo` for
    /// repositories whose branches could not be listed.
    pub async fn fetch_workflows(&self, org: &str, repo: Option<&str>) -> Result<Report> {
        let scope = match repo {
            Some(repo) => format!("{org}/{repo}"),
            None => org.to_string(),
        };
        BatchSpan::new("fetch", &scope)
            .in_scope_of(self.fetch_inner(org, repo))
            .await
    }

    async fn fetch_inner(&self, org: &str, repo: Option<&str>) -> Result<Report> {
        let started = Instant::now();
        let credential = self.credential_for(Some(org)).await?;
        let repos: Vec<RemoteRepository> = self
            .host
            .list_repositories(&credential, Some(org))
            .await
            .map_err(SyncError::from_discovery)?
            .into_iter()
            .filter(|r| repo.map_or(true, |want| r.name == want || r.full_name() == want))
            .collect();
        if repos.is_empty() {
            return Err(SyncError::NotFound(match repo {
                Some(repo) => format!("repository {repo} in {org}"),
                None => format!("repositories in {org}"),
            }));
        }

        let mut report = Report::new();
        let listings = join_all(repos.iter().map(|r| {
            let full_name = r.full_name();
            let url = remote_url(&self.git_base_url, &full_name, Some(credential.secret()));
            async move {
                let branches = self.git.list_all_branches(&url).await;
                (full_name, url, branches)
            }
        }))
        .await;

        let mut branches = Vec::new();
        for (full_name, url, listed) in listings {
            match listed {
                Ok(names) => branches.extend(
                    names
                        .into_iter()
                        .map(|name| (RemoteBranch::new(full_name.clone(), name), url.clone())),
                ),
                Err(err) => {
                    emit_clone_failed(&full_name, &err);
                    report.record(full_name, Outcome::failure(err));
                }
            }
        }

        emit_batch_started("fetch", branches.len());
        let mut clones = JoinSet::new();
        for (branch, url) in branches {
            let git = self.git.clone();
            let destination = branch.local_destination(&self.storage_root);
            clones.spawn(async move {
                let result = git
                    .clone_shallow(&url, &destination, &branch.branch, WORKFLOW_DIR)
                    .await;
                (destination, result)
            });
        }

        while let Some(joined) = clones.join_next().await {
            let (destination, result) = joined?;
            let key = destination.display().to_string();
            match result {
                Ok(()) => {
                    emit_branch_cloned(&key);
                    report.record(key, Outcome::success());
                }
                Err(err) => {
                    emit_clone_failed(&key, &err);
                    report.record(key, Outcome::failure(err));
                }
            }
        }

        emit_batch_finished(
            "fetch",
            started.elapsed().as_millis() as u64,
            report.succeeded(),
            report.failed(),
        );
        Ok(report)
    }

    /// Workflow files already fetched for `org` (optionally one repository).
    pub async fn list_workflows(&self, org: &str, repo: Option<&str>) -> Result<Vec<WorkflowFile>> {
        find_workflow_files(self.git.gate(), &self.storage_root, org, repo).await
    }

    /// Local `repo/branch` checkout directories of `org`.
    pub async fn local_branches(&self, org: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .git
            .find_local_branch_directories(&[self.storage_root.join(org)])
            .await?)
    }

    /// Write edited workflows and commit each touched branch once.
    ///
    /// Every record is decoded before anything is written, so an invalid
    /// payload fails the request without side effects.
    pub async fn apply_edits(&self, records: &[EditRecord]) -> Result<EditReport> {
        let files = decode_edits(records, &self.storage_root)?;
        BatchSpan::new("apply", &format!("{} files", files.len()))
            .in_scope_of(self.apply_decoded(files))
            .await
    }

    async fn apply_decoded(&self, files: Vec<WorkflowFile>) -> Result<EditReport> {
        let started = Instant::now();
        emit_batch_started("apply", files.len());
        let mut report = Report::new();

        let writes = join_all(files.iter().map(|file| self.write_file(file))).await;
        let mut targets: BTreeMap<PathBuf, CommitTarget> = BTreeMap::new();
        for (file, written) in files.iter().zip(writes) {
            match written {
                Ok(()) => {
                    report.record(file.path(), Outcome::success());
                    let directory = file.branch_directory(&self.storage_root);
                    targets
                        .entry(directory.clone())
                        .or_insert_with(|| CommitTarget {
                            repository: file.repository().to_string(),
                            branch: file.branch().to_string(),
                            directory,
                        });
                }
                Err(err) => {
                    emit_write_failed(file.path(), &err);
                    report.record(file.path(), Outcome::failure(err));
                }
            }
        }

        let mut credentials: BTreeMap<String, Credential> = BTreeMap::new();
        let mut jobs = Vec::with_capacity(targets.len());
        for target in targets.into_values() {
            let org = target.organization().to_string();
            let credential = match credentials.get(&org) {
                Some(credential) => credential.clone(),
                None => {
                    let credential = self.credential_for(Some(&org)).await?;
                    credentials.insert(org, credential.clone());
                    credential
                }
            };
            jobs.push((target, credential));
        }
        debug!(branches = jobs.len(), "committing branches");

        let commits = join_all(jobs.iter().map(|(target, credential)| async move {
            let strategy = CommitStrategy::for_credential(credential);
            let result = self.committer.commit_branch(target, credential, strategy).await;
            (target, result)
        }))
        .await;

        for (target, result) in commits {
            let key = target.directory.display().to_string();
            match result {
                Ok(receipt) => {
                    emit_commit_finished(&key, &receipt);
                    report.record(key, Outcome::success());
                }
                Err(err) => {
                    emit_commit_failed(&key, &err);
                    report.record(key, Outcome::failure(err));
                }
            }
        }

        emit_batch_finished(
            "apply",
            started.elapsed().as_millis() as u64,
            report.succeeded(),
            report.failed(),
        );
        Ok(report)
    }

    async fn write_file(&self, file: &WorkflowFile) -> Result<()> {
        let directory = file.branch_directory(&self.storage_root);
        let path = file.absolute_path(&self.storage_root);
        let content = file.content().to_string();
        self.git
            .gate()
            .run_fs(move || {
                if !directory.is_dir() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("branch checkout {} does not exist", directory.display()),
                    ));
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, content.as_bytes())
            })
            .await?;
        Ok(())
    }

    async fn credential_for(&self, org: Option<&str>) -> Result<Credential> {
        self.tokens
            .get_token(org)
            .await
            .map_err(SyncError::from_discovery)
    }
}

fn token_mode(config: &SyncConfig) -> Result<TokenMode> {
    if let Some(token) = &config.personal_access_token {
        return Ok(TokenMode::Personal(Credential::personal(token.clone())?));
    }
    let (Some(provider), Some(secret), Some(installation_id)) = (
        config.installation_token_provider.as_deref(),
        config.installation_token_provider_secret.as_deref(),
        config.installation_id,
    ) else {
        return Err(SyncError::Config("no credential source configured".into()));
    };
    let client = ApiClient::new(ApiClientConfig {
        timeout: config.http_timeout(),
        api_name: "token provider".to_string(),
        ..ApiClientConfig::default()
    })?;
    Ok(TokenMode::Installation {
        installation_id,
        source: Arc::new(TokenProviderClient::new(
            client,
            provider,
            secret,
            &config.github_api_url,
        )),
    })
}
