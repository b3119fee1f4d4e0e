//! runson - bulk `runs-on` label editing CLI
//!
//! ## Commands
//!
//! - `orgs`: organizations the configured credential can act on
//! - `repos`: repositories of an organization
//! - `fetch`: clone (or refresh) every branch of an organization or repository
//! - `workflows`: list fetched workflow files with their runner labels
//! - `branches`: list local branch checkouts of an organization
//! - `apply`: write edited workflows and commit each touched branch
//! - `labels`: print the predefined runner labels
//!
//! Results are printed as pretty JSON on stdout; logs go to stderr.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use runson_core::{EditRecord, SyncConfig, SyncOrchestrator};

#[derive(Parser)]
#[command(name = "runson")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bulk-edit GitHub Actions runner labels across repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Root of the <org>/<repo>/<branch> checkout tree
    #[arg(long, global = true, env = "REPO_STORAGE")]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List organizations visible to the configured credential
    Orgs,

    /// List repositories of an organization
    Repos {
        #[arg(long)]
        org: String,
    },

    /// Clone or refresh every branch of an organization (or one repository)
    Fetch {
        #[arg(long)]
        org: String,

        /// Repository name or owner/name
        #[arg(long)]
        repo: Option<String>,
    },

    /// List fetched workflow files and their runner labels
    Workflows {
        #[arg(long)]
        org: String,

        #[arg(long)]
        repo: Option<String>,
    },

    /// List local branch checkouts of an organization
    Branches {
        #[arg(long)]
        org: String,
    },

    /// Apply a bulk edit: a JSON array of {path, content(base64)} records
    Apply {
        /// Payload file, or `-` for stdin
        #[arg(long)]
        payload: PathBuf,
    },

    /// Print the predefined runner labels
    Labels,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    runson_core::init_tracing(cli.json, level);

    let mut config = SyncConfig::from_env();
    if let Some(root) = cli.storage_root {
        config.storage_root = root;
    }

    if let Commands::Labels = cli.command {
        return print_json(&config.predefined_labels);
    }

    let sync = SyncOrchestrator::from_config(&config).context("Failed to configure runson")?;
    info!(storage_root = %sync.storage_root().display(), "runson ready");

    match cli.command {
        Commands::Orgs => cmd_orgs(&sync).await,
        Commands::Repos { org } => cmd_repos(&sync, &org).await,
        Commands::Fetch { org, repo } => cmd_fetch(&sync, &org, repo.as_deref()).await,
        Commands::Workflows { org, repo } => cmd_workflows(&sync, &org, repo.as_deref()).await,
        Commands::Branches { org } => cmd_branches(&sync, &org).await,
        Commands::Apply { payload } => cmd_apply(&sync, &payload).await,
        Commands::Labels => Ok(()),
    }
}

async fn cmd_orgs(sync: &SyncOrchestrator) -> Result<()> {
    let orgs = sync
        .list_organizations()
        .await
        .context("Failed to list organizations")?;
    print_json(&orgs)
}

async fn cmd_repos(sync: &SyncOrchestrator, org: &str) -> Result<()> {
    let repos = sync
        .list_repositories(org)
        .await
        .with_context(|| format!("Failed to list repositories of {org}"))?;
    print_json(&repos)
}

async fn cmd_fetch(sync: &SyncOrchestrator, org: &str, repo: Option<&str>) -> Result<()> {
    let report = sync
        .fetch_workflows(org, repo)
        .await
        .with_context(|| format!("Failed to fetch workflows of {org}"))?;
    info!(succeeded = report.succeeded(), failed = report.failed(), "fetch complete");
    print_json(&report)
}

async fn cmd_workflows(sync: &SyncOrchestrator, org: &str, repo: Option<&str>) -> Result<()> {
    let files = sync
        .list_workflows(org, repo)
        .await
        .context("Failed to scan workflow files")?;
    print_json(&files)
}

async fn cmd_branches(sync: &SyncOrchestrator, org: &str) -> Result<()> {
    let dirs = sync
        .local_branches(org)
        .await
        .context("Failed to list local branches")?;
    print_json(&dirs)
}

async fn cmd_apply(sync: &SyncOrchestrator, payload: &Path) -> Result<()> {
    let raw = read_payload(payload)?;
    let records = parse_records(&raw)?;
    let report = sync
        .apply_edits(&records)
        .await
        .context("Failed to apply edits")?;
    info!(succeeded = report.succeeded(), failed = report.failed(), "apply complete");
    print_json(&report)
}

fn read_payload(payload: &Path) -> Result<String> {
    if payload == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read payload from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(payload)
            .with_context(|| format!("Failed to read payload {}", payload.display()))
    }
}

fn parse_records(raw: &str) -> Result<Vec<EditRecord>> {
    serde_json::from_str(raw).context("Payload must be a JSON array of {path, content} records")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
