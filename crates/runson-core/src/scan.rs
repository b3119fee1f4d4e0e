//! Discovery of workflow documents in the storage tree.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::{Result, WorkflowFile};
use crate::gate::ConcurrencyGate;

static WORKFLOW_KEY: OnceLock<Option<Regex>> = OnceLock::new();

/// True when `content` has a top-level `on:` or `jobs:` key once common
/// leading indentation is removed.
pub fn is_workflow_document(content: &str) -> bool {
    let Some(pattern) = WORKFLOW_KEY
        .get_or_init(|| Regex::new(r"(?m)^(?:on|jobs)\b\s*:").ok())
        .as_ref()
    else {
        return false;
    };
    pattern.is_match(&dedent(content))
}

/// Every workflow under `<root>/<org>[/<repo>]`, skipping `.git` directories.
///
/// Unreadable files and documents without workflow keys are skipped.
pub async fn find_workflow_files(
    gate: &ConcurrencyGate,
    root: &Path,
    org: &str,
    repo: Option<&str>,
) -> Result<Vec<WorkflowFile>> {
    let root = root.to_path_buf();
    let mut base = root.join(org);
    if let Some(repo) = repo {
        base.push(repo);
    }

    let files = gate
        .run_fs(move || Ok(scan_tree(&root, &base)))
        .await?;
    debug!(org = %org, repo = ?repo, count = files.len(), "scanned workflow files");
    Ok(files)
}

fn scan_tree(root: &Path, base: &Path) -> Vec<WorkflowFile> {
    WalkDir::new(base)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && has_yaml_extension(entry.path()))
        .filter_map(|entry| {
            let content = std::fs::read_to_string(entry.path()).ok()?;
            if !is_workflow_document(&content) {
                return None;
            }
            let relative = relative_slash_path(root, entry.path())?;
            match WorkflowFile::new(root, &relative, content) {
                Ok(file) => Some(file),
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "skipping workflow file");
                    None
                }
            }
        })
        .collect()
}

fn has_yaml_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative: PathBuf = path.strip_prefix(root).ok()?.to_path_buf();
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn dedent(content: &str) -> String {
    let indent = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    content
        .lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}
