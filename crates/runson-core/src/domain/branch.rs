//! Remote branches discovered for cloning.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::branch_path::branch_directory;

/// A branch of a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteBranch {
    /// `owner/repo`
    pub repository: String,
    pub branch: String,
}

impl RemoteBranch {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
        }
    }

    /// Where this branch is checked out under `root`.
    pub fn local_destination(&self, root: &Path) -> PathBuf {
        branch_directory(root, &self.repository, &self.branch)
    }
}
