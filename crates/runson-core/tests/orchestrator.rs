//! SyncOrchestrator over file:// remotes with a static repository host.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{file_base, identity, seed_remote, show, workflow_with_label, CI_WORKFLOW};
use github_gateway::{Credential, GitHub, GitHubEndpoints, RemoteRepository, TokenCache, TokenMode};
use runson_core::{
    BranchCommitter, CommitReceipt, CommitStrategy, CommitTarget, ConcurrencyGate, EditRecord,
    GitClient, GitHubCommitter, RepositoryHost, SyncError, SyncOrchestrator,
};

struct StaticHost {
    repos: Vec<RemoteRepository>,
}

impl StaticHost {
    fn new(names: &[&str]) -> Self {
        let repos = names
            .iter()
            .enumerate()
            .map(|(i, name)| RemoteRepository {
                id: i as u64 + 1,
                name: name.to_string(),
                owner: "acme".into(),
                owner_id: 100,
                private: false,
            })
            .collect();
        Self { repos }
    }
}

#[async_trait]
impl RepositoryHost for StaticHost {
    async fn list_organizations(&self, _: &Credential) -> github_gateway::Result<Vec<String>> {
        Ok(vec!["acme".into()])
    }

    async fn list_repositories(
        &self,
        _: &Credential,
        org: Option<&str>,
    ) -> github_gateway::Result<Vec<RemoteRepository>> {
        Ok(self
            .repos
            .iter()
            .filter(|r| org.map_or(true, |o| r.owner == o))
            .cloned()
            .collect())
    }
}

/// Records every target and fails the branches named in `failing`.
#[derive(Default)]
struct RecordingCommitter {
    failing: Vec<String>,
    calls: Mutex<Vec<(CommitTarget, CommitStrategy)>>,
}

#[async_trait]
impl BranchCommitter for RecordingCommitter {
    async fn commit_branch(
        &self,
        target: &CommitTarget,
        _: &Credential,
        strategy: CommitStrategy,
    ) -> runson_core::Result<CommitReceipt> {
        self.calls.lock().unwrap().push((target.clone(), strategy));
        if self.failing.contains(&target.branch) {
            Err(SyncError::HeadConflict { attempts: 3 })
        } else {
            Ok(CommitReceipt::Unchanged)
        }
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    remotes: PathBuf,
    store: PathBuf,
    bare: PathBuf,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let remotes = tmp.path().join("remotes");
    let store = tmp.path().join("store");
    fs::create_dir_all(&store).unwrap();
    let bare = seed_remote(&remotes, "acme/svc", &["main", "feature/x"]);
    Fixture {
        _tmp: tmp,
        remotes,
        store,
        bare,
    }
}

fn git() -> GitClient {
    GitClient::new(Arc::new(ConcurrencyGate::new(8, 8)))
}

fn personal_tokens() -> Arc<TokenCache> {
    let credential = Credential::personal("github_pat_test").unwrap();
    Arc::new(TokenCache::new(TokenMode::Personal(credential)))
}

fn orchestrator(fx: &Fixture, committer: Arc<dyn BranchCommitter>) -> SyncOrchestrator {
    SyncOrchestrator::new(
        fx.store.clone(),
        &file_base(&fx.remotes),
        git(),
        personal_tokens(),
        Arc::new(StaticHost::new(&["svc"])),
        committer,
    )
}

fn key(path: &Path) -> String {
    path.display().to_string()
}

#[tokio::test]
async fn fetch_clones_every_branch() {
    let fx = fixture();
    let sync = orchestrator(&fx, Arc::new(RecordingCommitter::default()));

    let report = sync.fetch_workflows("acme", None).await.unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(report.failed(), 0);
    let main = fx.store.join("acme/svc/main");
    let feature = fx.store.join("acme/svc/feature/x");
    assert!(report.get(&key(&main)).unwrap().is_success());
    assert!(report.get(&key(&feature)).unwrap().is_success());
    assert!(main.join(".github/workflows/ci.yml").is_file());
    assert!(feature.join(".github/workflows/ci.yml").is_file());

    // A second fetch refreshes the existing checkouts.
    let again = sync.fetch_workflows("acme", Some("acme/svc")).await.unwrap();
    assert_eq!(again.succeeded(), 2);

    let mut workflows = sync.list_workflows("acme", None).await.unwrap();
    workflows.sort_by(|a, b| a.path().cmp(b.path()));
    let summary: Vec<(&str, &str)> = workflows.iter().map(|w| (w.path(), w.branch())).collect();
    assert_eq!(
        summary,
        vec![
            ("acme/svc/feature/x/.github/workflows/ci.yml", "feature/x"),
            ("acme/svc/main/.github/workflows/ci.yml", "main"),
        ]
    );
    assert!(workflows.iter().all(|w| w.labels().contains("ubuntu-latest")));
    assert!(workflows.iter().all(|w| w.repository() == "acme/svc"));

    let local = sync.local_branches("acme").await.unwrap();
    assert!(local.contains(&main));
}

#[tokio::test]
async fn occupied_destination_that_cannot_refresh_is_a_failure() {
    let fx = fixture();
    let main = fx.store.join("acme/svc/main");
    fs::create_dir_all(&main).unwrap();
    fs::write(main.join("notes.txt"), "not a checkout").unwrap();
    let sync = orchestrator(&fx, Arc::new(RecordingCommitter::default()));

    let report = sync.fetch_workflows("acme", None).await.unwrap();
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    let outcome = report.get(&key(&main)).unwrap();
    assert!(!outcome.is_success());
    assert!(
        outcome.error().unwrap().contains("could not be refreshed"),
        "unexpected: {:?}",
        outcome.error()
    );
    assert!(report.get(&key(&fx.store.join("acme/svc/feature/x"))).unwrap().is_success());
}

#[tokio::test]
async fn discovery_passes_through_host() {
    let fx = fixture();
    let sync = orchestrator(&fx, Arc::new(RecordingCommitter::default()));

    assert_eq!(sync.list_organizations().await.unwrap(), vec!["acme"]);
    let repos = sync.list_repositories("acme").await.unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].full_name(), "acme/svc");
    assert!(sync.list_repositories("globex").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_repository_is_not_found() {
    let fx = fixture();
    let sync = orchestrator(&fx, Arc::new(RecordingCommitter::default()));

    let err = sync.fetch_workflows("acme", Some("nope")).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "unexpected: {err}");
    let err = sync.fetch_workflows("globex", None).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "unexpected: {err}");
}

#[tokio::test]
async fn unreachable_repository_is_reported_not_raised() {
    let fx = fixture();
    let sync = SyncOrchestrator::new(
        fx.store.clone(),
        &file_base(&fx.remotes),
        git(),
        personal_tokens(),
        Arc::new(StaticHost::new(&["svc", "missing"])),
        Arc::new(RecordingCommitter::default()),
    );

    let report = sync.fetch_workflows("acme", None).await.unwrap();
    assert_eq!(report.succeeded(), 2);
    let missing = report.get("acme/missing").unwrap();
    assert!(!missing.is_success());
    assert!(missing.error().unwrap().contains("not found"));
}

#[tokio::test]
async fn edits_are_grouped_per_branch_and_failures_isolated() {
    let fx = fixture();
    let committer = Arc::new(RecordingCommitter {
        failing: vec!["feature/x".into()],
        ..RecordingCommitter::default()
    });
    let sync = orchestrator(&fx, committer.clone());
    sync.fetch_workflows("acme", None).await.unwrap();

    let records = vec![
        EditRecord::encode(
            "acme/svc/main/.github/workflows/ci.yml",
            &workflow_with_label("self-hosted"),
        ),
        EditRecord::encode(
            "acme/svc/main/.github/workflows/lint.yml",
            &workflow_with_label("lint-pool"),
        ),
        EditRecord::encode(
            "acme/svc/feature/x/.github/workflows/ci.yml",
            &workflow_with_label("gpu"),
        ),
        EditRecord::encode("acme/svc/ghost/.github/workflows/ci.yml", CI_WORKFLOW),
    ];
    let report = sync.apply_edits(&records).await.unwrap();

    for ok in [
        "acme/svc/main/.github/workflows/ci.yml",
        "acme/svc/main/.github/workflows/lint.yml",
        "acme/svc/feature/x/.github/workflows/ci.yml",
    ] {
        assert!(report.get(ok).unwrap().is_success(), "{ok} should be written");
    }
    let ghost = report.get("acme/svc/ghost/.github/workflows/ci.yml").unwrap();
    assert!(!ghost.is_success());
    assert!(!fx.store.join("acme/svc/ghost").exists());

    let main = fx.store.join("acme/svc/main");
    let feature = fx.store.join("acme/svc/feature/x");
    assert!(report.get(&key(&main)).unwrap().is_success());
    let failed = report.get(&key(&feature)).unwrap();
    assert!(failed.error().unwrap().contains("branch head changed"));
    assert_eq!(report.len(), 6);

    let calls = committer.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(_, s)| *s == CommitStrategy::DirectPush));
    let mut dirs: Vec<&PathBuf> = calls.iter().map(|(t, _)| &t.directory).collect();
    dirs.sort();
    assert_eq!(dirs, vec![&feature, &main]);

    assert_eq!(
        fs::read_to_string(main.join(".github/workflows/lint.yml")).unwrap(),
        workflow_with_label("lint-pool")
    );
}

#[tokio::test]
async fn invalid_record_fails_before_any_write() {
    let fx = fixture();
    let committer = Arc::new(RecordingCommitter::default());
    let sync = orchestrator(&fx, committer.clone());
    sync.fetch_workflows("acme", None).await.unwrap();

    let records = vec![
        EditRecord::encode(
            "acme/svc/main/.github/workflows/ci.yml",
            &workflow_with_label("self-hosted"),
        ),
        EditRecord {
            path: "acme/svc/main/.github/workflows/bad.yml".into(),
            content: "%%% not base64 %%%".into(),
        },
    ];
    let err = sync.apply_edits(&records).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidPayload(_)), "unexpected: {err}");

    let escaping = vec![EditRecord::encode("acme/../../etc/passwd", "x")];
    let err = sync.apply_edits(&escaping).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidPayload(_)), "unexpected: {err}");

    assert_eq!(
        fs::read_to_string(fx.store.join("acme/svc/main/.github/workflows/ci.yml")).unwrap(),
        CI_WORKFLOW
    );
    assert!(committer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn direct_push_lands_edits_on_the_remote() {
    let fx = fixture();
    let git = git();
    let github = GitHub::new(GitHubEndpoints::default(), Duration::from_secs(5)).unwrap();
    let committer = GitHubCommitter::new(git.clone(), github, &file_base(&fx.remotes), identity());
    let sync = SyncOrchestrator::new(
        fx.store.clone(),
        &file_base(&fx.remotes),
        git,
        personal_tokens(),
        Arc::new(StaticHost::new(&["svc"])),
        Arc::new(committer),
    );
    sync.fetch_workflows("acme", None).await.unwrap();

    let edited = workflow_with_label("self-hosted");
    let records = vec![EditRecord::encode("acme/svc/feature/x/.github/workflows/ci.yml", &edited)];
    let report = sync.apply_edits(&records).await.unwrap();
    assert_eq!(report.failed(), 0, "{report:?}");
    assert_eq!(show(&fx.bare, "feature/x:.github/workflows/ci.yml"), edited);
    assert_eq!(show(&fx.bare, "main:.github/workflows/ci.yml"), CI_WORKFLOW);

    // Re-applying identical content leaves the branch alone.
    let report = sync.apply_edits(&records).await.unwrap();
    assert_eq!(report.failed(), 0, "{report:?}");

    let workflows = sync.list_workflows("acme", Some("svc")).await.unwrap();
    let feature = workflows.iter().find(|w| w.branch() == "feature/x").unwrap();
    assert!(feature.labels().contains("self-hosted"));
}
