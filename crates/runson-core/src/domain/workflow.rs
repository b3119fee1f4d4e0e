//! Workflow files in the storage tree and inbound edit records.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize, Serializer};

use crate::branch_path::{branch_directory, resolve_branch};
use crate::domain::error::{Result, SyncError};
use crate::git::WORKFLOW_DIR;
use crate::labels::extract_labels;

/// A workflow document stored at `<root>/<org>/<repo>/<branch>/...`.
///
/// Organization, repository, branch and labels are derived when the value
/// is built and cannot be set independently; use
/// [`with_content`](Self::with_content) to replace the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFile {
    path: String,
    content: String,
    organization: String,
    repository: String,
    branch: String,
    labels: BTreeSet<String>,
}

impl WorkflowFile {
    /// `relative_path` is `/`-separated and rooted at `root`.
    pub fn new(root: &Path, relative_path: &str, content: String) -> Result<Self> {
        let segments: Vec<&str> = relative_path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 3 {
            return Err(SyncError::InvalidPayload(format!(
                "path {relative_path} must be <org>/<repo>/<file...>"
            )));
        }
        let branch = resolve_branch(
            &root.join(relative_path),
            root,
            Some(Path::new(WORKFLOW_DIR)),
        )?;
        let labels = extract_labels(&content);
        Ok(Self {
            path: segments.join("/"),
            organization: segments[0].to_string(),
            repository: format!("{}/{}", segments[0], segments[1]),
            branch,
            labels,
            content,
        })
    }

    /// Same file with new text; labels are recomputed.
    pub fn with_content(&self, root: &Path, content: String) -> Result<Self> {
        Self::new(root, &self.path, content)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// `org/repo`
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn absolute_path(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }

    /// Checkout directory of the branch this file belongs to.
    pub fn branch_directory(&self, root: &Path) -> PathBuf {
        branch_directory(root, &self.repository, &self.branch)
    }
}

impl Serialize for WorkflowFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            path: &'a str,
            content: String,
            #[serde(rename = "runs-on")]
            runs_on: &'a BTreeSet<String>,
        }
        Wire {
            path: &self.path,
            content: BASE64.encode(self.content.as_bytes()),
            runs_on: &self.labels,
        }
        .serialize(serializer)
    }
}

/// One edited file in a bulk-edit request; `content` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditRecord {
    pub path: String,
    pub content: String,
}

impl EditRecord {
    /// Encode `content` for transport.
    pub fn encode(path: impl Into<String>, content: &str) -> Self {
        Self {
            path: path.into(),
            content: BASE64.encode(content.as_bytes()),
        }
    }

    /// Validate the path and decode the content.
    pub fn decode(&self, root: &Path) -> Result<WorkflowFile> {
        let path = self.path.trim();
        if path.starts_with('/') || Path::new(path).is_absolute() {
            return Err(SyncError::InvalidPayload(format!("absolute path {path}")));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(SyncError::InvalidPayload(format!("path {path} escapes the storage root")));
        }
        let bytes = BASE64
            .decode(self.content.trim())
            .map_err(|e| SyncError::InvalidPayload(format!("{path}: invalid base64 content: {e}")))?;
        let content = String::from_utf8(bytes)
            .map_err(|e| SyncError::InvalidPayload(format!("{path}: content is not UTF-8: {e}")))?;
        WorkflowFile::new(root, path, content)
    }
}

/// Decode every record, failing on the first invalid one.
pub fn decode_edits(records: &[EditRecord], root: &Path) -> Result<Vec<WorkflowFile>> {
    records.iter().map(|record| record.decode(root)).collect()
}
