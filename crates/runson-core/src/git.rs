//! Git integration: shallow sparse clones, status, commit and push.
//!
//! Every invocation goes through [`ConcurrencyGate::run_process`] and passes
//! its arguments as a vector, so paths, branches and remote URLs reach `git`
//! as single literal arguments. Remote URLs may embed a credential; it is
//! redacted from every rendered command line and error message.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::gate::ConcurrencyGate;

/// Directory that is sparse-checked-out in every clone.
pub const WORKFLOW_DIR: &str = ".github/workflows";

/// Pause between a resync and the next push attempt.
pub const CONFLICT_PAUSE: Duration = Duration::from_secs(1);

const CREDENTIAL_USER: &str = "x-access-token:";

/// Output fragments meaning the push lost a race against the remote.
const PUSH_CONFLICT_MARKERS: &[&str] = &[
    "non-fast-forward",
    "fetch first",
    "your branch is ahead of",
    "tip of your current branch is behind",
    "to merge the remote branch into yours",
];

/// Output fragments meaning a fast-forward pull could not be applied.
const REFETCH_CONFLICT_MARKERS: &[&str] = &[
    "non-fast-forward",
    "fetch first",
    "not possible to fast-forward",
    "diverg",
    "unrelated histories",
    "would be overwritten",
];

/// Errors raised by [`GitClient`].
#[derive(Debug, Error)]
pub enum GitError {
    /// `git` exited non-zero; `message` joins its stderr and stdout
    #[error("git command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// Local and remote histories diverged; recoverable by a refetch
    #[error("git conflict: {0}")]
    Conflict(String),

    #[error("remote repository not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Clone destination is occupied and could not be refreshed
    #[error("destination {} already exists and could not be refreshed: {reason}", path.display())]
    AlreadyExists { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Combined output of a failed command, if this is one.
    pub fn output(&self) -> Option<&str> {
        match self {
            GitError::Command { message, .. } => Some(message),
            _ => None,
        }
    }

    fn output_matches(&self, markers: &[&str]) -> bool {
        self.output().is_some_and(|out| contains_any(out, markers))
    }
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

/// Transient identity and headline used for bulk commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub author: String,
    pub email: String,
    pub message: String,
}

/// Outcome of one commit-and-push attempt.
#[derive(Debug)]
pub enum PushAttempt {
    Pushed,
    /// The remote moved; resync and try again
    Conflict(String),
    /// Anything else; never retried
    Fatal(GitError),
}

impl PushAttempt {
    /// Classify a failed git step.
    pub fn from_error(err: GitError) -> Self {
        match err {
            GitError::Conflict(reason) => PushAttempt::Conflict(reason),
            err if err.output_matches(PUSH_CONFLICT_MARKERS) => {
                PushAttempt::Conflict(err.output().unwrap_or_default().to_string())
            }
            err => PushAttempt::Fatal(err),
        }
    }
}

/// One side of the push convergence loop.
#[async_trait]
pub trait PushCycle: Send + Sync {
    /// Stage, commit and push once.
    async fn attempt(&self) -> PushAttempt;

    /// Bring the local checkout back in line with the remote after a conflict.
    async fn resync(&self) -> Result<()>;
}

/// Drive `cycle` until a push lands or a non-conflict error occurs.
///
/// Conflicts are retried without limit; callers that need a deadline wrap
/// this in a timeout. Returns the number of attempts made.
pub async fn converge<C>(cycle: &C, pause: Duration) -> Result<u32>
where
    C: PushCycle + ?Sized,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match cycle.attempt().await {
            PushAttempt::Pushed => return Ok(attempts),
            PushAttempt::Fatal(err) => return Err(err),
            PushAttempt::Conflict(reason) => {
                warn!(attempt = attempts, reason = %first_line(&reason), "push rejected, resyncing with remote");
                cycle.resync().await?;
                tokio::time::sleep(pause).await;
            }
        }
    }
}

/// Build the remote URL for `full_name` (`owner/repo`).
///
/// An `https` base gets the credential embedded as
/// `https://x-access-token:<secret>@host/owner/repo.git`; other bases
/// (e.g. `file://` mirrors) are joined as-is.
pub fn remote_url(base: &str, full_name: &str, secret: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match (base.strip_prefix("https://"), secret) {
        (Some(host), Some(secret)) => {
            format!("https://{CREDENTIAL_USER}{secret}@{host}/{full_name}.git")
        }
        _ => format!("{base}/{full_name}.git"),
    }
}

/// Replace every embedded `x-access-token:<secret>@` credential.
pub fn redact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(CREDENTIAL_USER) {
        let secret_start = start + CREDENTIAL_USER.len();
        out.push_str(&rest[..secret_start]);
        match rest[secret_start..].find(|c: char| c == '@' || c.is_whitespace()) {
            Some(end) if rest[secret_start + end..].starts_with('@') => {
                out.push_str("***");
                rest = &rest[secret_start + end..];
            }
            _ => rest = &rest[secret_start..],
        }
    }
    out.push_str(rest);
    out
}

/// Thin async wrapper over the `git` executable.
#[derive(Debug, Clone)]
pub struct GitClient {
    gate: Arc<ConcurrencyGate>,
    program: String,
}

impl GitClient {
    pub fn new(gate: Arc<ConcurrencyGate>) -> Self {
        Self {
            gate,
            program: "git".to_string(),
        }
    }

    /// Use a different executable (for example an absolute path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// Depth-1, single-branch clone restricted to `sparse_path`.
    ///
    /// A non-empty destination is refreshed with [`force_refetch`](Self::force_refetch)
    /// instead; if that fails too the result is [`GitError::AlreadyExists`].
    pub async fn clone_shallow(
        &self,
        remote_url: &str,
        destination: &Path,
        branch: &str,
        sparse_path: &str,
    ) -> Result<()> {
        let dest = destination.to_path_buf();
        let occupied = self
            .gate
            .run_fs(move || {
                std::fs::create_dir_all(&dest)?;
                Ok(std::fs::read_dir(&dest)?.next().is_some())
            })
            .await?;

        if occupied {
            debug!(destination = %destination.display(), "destination not empty, refetching");
            return match self.force_refetch(destination, branch, remote_url).await {
                Ok(()) | Err(GitError::Conflict(_)) => Ok(()),
                Err(err) => {
                    warn!(destination = %destination.display(), error = %err, "refetch of existing checkout failed");
                    Err(GitError::AlreadyExists {
                        path: destination.to_path_buf(),
                        reason: err.to_string(),
                    })
                }
            };
        }

        self.run(
            destination,
            &[
                "clone",
                "-n",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                branch,
                "--filter=tree:0",
                remote_url,
                ".",
            ],
        )
        .await?;
        self.run(destination, &["sparse-checkout", "set", "--cone", sparse_path])
            .await?;
        self.run(destination, &["checkout"]).await?;
        info!(destination = %destination.display(), branch = %branch, "cloned branch");
        Ok(())
    }

    /// Fast-forward to the remote tip, falling back to a hard reset.
    ///
    /// When the pull cannot fast-forward the tree is reset to the fetched
    /// head and [`GitError::Conflict`] is returned. An up-to-date pull still
    /// resets so stray edits are discarded.
    pub async fn force_refetch(&self, destination: &Path, branch: &str, remote_url: &str) -> Result<()> {
        let pulled = self
            .run(destination, &["pull", "--ff-only", "--depth", "1", remote_url, branch])
            .await;
        match pulled {
            Ok(out) => {
                let lowered = out.to_lowercase();
                if lowered.contains("already up to date") || lowered.contains("already up-to-date") {
                    self.run(destination, &["reset", "--hard", "FETCH_HEAD"]).await?;
                }
                debug!(destination = %destination.display(), "refetched branch");
                Ok(())
            }
            Err(err) if err.output_matches(REFETCH_CONFLICT_MARKERS) => {
                self.run(destination, &["reset", "--hard", "FETCH_HEAD"]).await?;
                warn!(destination = %destination.display(), "local history diverged, reset to remote head");
                Err(GitError::Conflict(err.output().unwrap_or_default().to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Stage everything and commit with a transient identity.
    pub async fn commit(&self, destination: &Path, identity: &CommitIdentity) -> Result<()> {
        self.run(destination, &["add", "."]).await?;
        let name = format!("user.name={}", identity.author);
        let email = format!("user.email={}", identity.email);
        self.run(
            destination,
            &["-c", &name, "-c", &email, "commit", "-m", &identity.message],
        )
        .await?;
        Ok(())
    }

    /// Push `HEAD` to `branch`; a rejected non-fast-forward is a conflict.
    pub async fn push(&self, destination: &Path, branch: &str, remote_url: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        match self.run(destination, &["push", remote_url, &refspec]).await {
            Ok(_) => Ok(()),
            Err(err) if err.output_matches(PUSH_CONFLICT_MARKERS) => {
                Err(GitError::Conflict(err.output().unwrap_or_default().to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Commit local changes and push them, resyncing on every conflict.
    ///
    /// Changed files are captured before the first attempt and written back
    /// after each resync, since the resync hard-resets the tree.
    pub async fn commit_and_push(
        &self,
        destination: &Path,
        branch: &str,
        remote_url: &str,
        identity: &CommitIdentity,
    ) -> Result<u32> {
        let snapshot = self.snapshot_changes(destination).await?;
        let cycle = ShellPushCycle {
            git: self,
            destination,
            branch,
            remote_url,
            identity,
            snapshot,
        };
        let attempts = converge(&cycle, CONFLICT_PAUSE).await?;
        info!(destination = %destination.display(), branch = %branch, attempts, "pushed branch");
        Ok(attempts)
    }

    /// Paths (relative to the checkout) that are modified, added or untracked.
    pub async fn find_changed_files(&self, path: &Path) -> Result<Vec<String>> {
        let out = self
            .run(path, &["status", "--porcelain", "-z", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain(&out))
    }

    /// Commit id of the remote branch tip.
    pub async fn get_remote_head(&self, path: &Path, branch: &str, remote_url: &str) -> Result<String> {
        let head_ref = format!("refs/heads/{branch}");
        let out = self.run(path, &["ls-remote", remote_url, &head_ref]).await?;
        out.lines()
            .find_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .ok_or_else(|| GitError::NotFound(format!("branch {branch}")))
    }

    /// Every branch name on the remote.
    pub async fn list_all_branches(&self, remote_url: &str) -> Result<Vec<String>> {
        let cwd = std::env::temp_dir();
        let out = match self.run(&cwd, &["ls-remote", "--heads", remote_url]).await {
            Ok(out) => out,
            Err(err) => return Err(classify_remote_failure(err)),
        };
        Ok(out
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .filter_map(|(_, name)| name.trim().strip_prefix("refs/heads/"))
            .map(str::to_string)
            .collect())
    }

    /// Every `repo/branch` directory two levels below each organization root.
    pub async fn find_local_branch_directories(&self, org_paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let roots = org_paths.to_vec();
        let dirs = self
            .gate
            .run_fs(move || {
                let mut found = Vec::new();
                for root in &roots {
                    found.extend(
                        walkdir::WalkDir::new(root)
                            .min_depth(2)
                            .max_depth(2)
                            .into_iter()
                            .filter_map(|entry| entry.ok())
                            .filter(|entry| entry.file_type().is_dir())
                            .map(|entry| entry.into_path()),
                    );
                }
                found.sort();
                Ok(found)
            })
            .await?;
        Ok(dirs)
    }

    async fn snapshot_changes(&self, destination: &Path) -> Result<Vec<(String, Vec<u8>)>> {
        let changed = self.find_changed_files(destination).await?;
        let root = destination.to_path_buf();
        let snapshot = self
            .gate
            .run_fs(move || {
                changed
                    .iter()
                    .map(|rel| Ok((rel.clone(), std::fs::read(root.join(rel))?)))
                    .collect::<std::io::Result<Vec<_>>>()
            })
            .await?;
        Ok(snapshot)
    }

    async fn restore(&self, destination: &Path, snapshot: &[(String, Vec<u8>)]) -> Result<()> {
        let root = destination.to_path_buf();
        let files = snapshot.to_vec();
        self.gate
            .run_fs(move || {
                for (rel, data) in &files {
                    let target = root.join(rel);
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(target, data)?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let rendered = render_command(&self.program, args);
        debug!(command = %rendered, cwd = %cwd.display(), "running git");
        let output = self.gate.run_process(&mut command).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Err(GitError::Command {
            command: rendered,
            message: redact(&message),
        })
    }
}

struct ShellPushCycle<'a> {
    git: &'a GitClient,
    destination: &'a Path,
    branch: &'a str,
    remote_url: &'a str,
    identity: &'a CommitIdentity,
    snapshot: Vec<(String, Vec<u8>)>,
}

#[async_trait]
impl PushCycle for ShellPushCycle<'_> {
    async fn attempt(&self) -> PushAttempt {
        match self.git.commit(self.destination, self.identity).await {
            Ok(()) => {}
            Err(err) if is_nothing_to_commit(&err) => {
                debug!(destination = %self.destination.display(), "nothing to commit");
            }
            Err(err) => return PushAttempt::from_error(err),
        }
        match self.git.push(self.destination, self.branch, self.remote_url).await {
            Ok(()) => PushAttempt::Pushed,
            Err(err) => PushAttempt::from_error(err),
        }
    }

    async fn resync(&self) -> Result<()> {
        match self
            .git
            .force_refetch(self.destination, self.branch, self.remote_url)
            .await
        {
            Ok(()) | Err(GitError::Conflict(_)) => {}
            Err(err) => return Err(err),
        }
        self.git.restore(self.destination, &self.snapshot).await
    }
}

fn is_nothing_to_commit(err: &GitError) -> bool {
    err.output_matches(&["nothing to commit", "nothing added to commit"])
}

fn classify_remote_failure(err: GitError) -> GitError {
    let Some(out) = err.output() else {
        return err;
    };
    let lowered = out.to_lowercase();
    if lowered.contains("403") || lowered.contains("forbidden") || lowered.contains("permission denied") {
        GitError::PermissionDenied(out.to_string())
    } else if lowered.contains("404")
        || lowered.contains("not found")
        || lowered.contains("does not appear to be a git repository")
    {
        GitError::NotFound(out.to_string())
    } else {
        err
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    markers.iter().any(|m| lowered.contains(m))
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Parse `git status --porcelain -z` output.
fn parse_porcelain(out: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut entries = out.split('\0').filter(|e| !e.is_empty());
    while let Some(entry) = entries.next() {
        if entry.len() < 4 {
            continue;
        }
        let (code, path) = entry.split_at(3);
        let code = code.trim_end();
        if code.starts_with('R') || code.starts_with('C') {
            // Renames and copies are followed by their source path.
            entries.next();
        }
        if code == "??" || code.contains('M') || code.contains('A') {
            files.push(path.to_string());
        }
    }
    files
}

fn render_command(program: &str, args: &[&str]) -> String {
    let rendered: Vec<String> = std::iter::once(program)
        .chain(args.iter().copied())
        .map(shell_quote)
        .collect();
    redact(&rendered.join(" "))
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}
