//! Recover a branch name from a path inside the storage tree.
//!
//! Checkouts live at `<root>/<org>/<repo>/<branch>/...`, and branch names may
//! themselves contain `/`. Given a marker fragment that appears exactly once
//! inside every checkout (the workflow directory), everything between the
//! repository segment and the marker is the branch.

use std::path::{Component, Path, PathBuf};

use crate::domain::error::{Result, SyncError};

/// Branch name used when a path has nothing between repository and marker.
pub const ROOT_BRANCH: &str = ".";

/// Resolve the branch that `path` belongs to.
///
/// Without a marker, or when the marker never matches, the whole relative
/// path after `<org>/<repo>` is taken as the branch. Fails with
/// [`SyncError::PathOutsideRoot`] when `path` is not under `root` or climbs
/// out of it through `..`.
pub fn resolve_branch(path: &Path, root: &Path, marker: Option<&Path>) -> Result<String> {
    let outside = || SyncError::PathOutsideRoot {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
    };
    let relative = path.strip_prefix(root).map_err(|_| outside())?;
    // `strip_prefix` is lexical; a `..` can still climb out of the root.
    if relative.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(outside());
    }

    let segments = normal_segments(relative);
    let marker = marker.map(normal_segments).unwrap_or_default();

    let end = if marker.is_empty() || marker.len() > segments.len() {
        None
    } else {
        (0..=segments.len() - marker.len()).find(|&i| segments[i..i + marker.len()] == marker[..])
    };
    let branch_segments = &segments[..end.unwrap_or(segments.len())];

    if branch_segments.len() <= 2 {
        Ok(ROOT_BRANCH.to_string())
    } else {
        Ok(branch_segments[2..].join("/"))
    }
}

/// `<root>/<org>/<repo>/<branch>`; the root branch maps to the repository
/// directory itself.
pub fn branch_directory(root: &Path, repository: &str, branch: &str) -> PathBuf {
    let repo_dir = root.join(repository);
    if branch == ROOT_BRANCH {
        repo_dir
    } else {
        repo_dir.join(branch)
    }
}

fn normal_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(path: &str, root: &str, marker: Option<&str>) -> Result<String> {
        resolve_branch(Path::new(path), Path::new(root), marker.map(Path::new))
    }

    #[test]
    fn branch_before_workflow_directory() {
        assert_eq!(
            resolve("/root/org1/repo1/featureX/.github/workflows/test.yaml", "/root", Some(".github/workflows")).unwrap(),
            "featureX"
        );
    }

    #[test]
    fn branch_names_with_slashes_survive() {
        assert_eq!(
            resolve("/root/org1/repo1/featureX/path/to/content/file.txt", "/root", Some("content")).unwrap(),
            "featureX/path/to"
        );
        assert_eq!(
            resolve("/srv/acme/svc/release/2024/q1/.github/workflows/ci.yml", "/srv", Some(".github/workflows")).unwrap(),
            "release/2024/q1"
        );
    }

    #[test]
    fn marker_directly_under_repository_yields_root_branch() {
        assert_eq!(
            resolve("/root/org1/repo1/content/file.txt", "/root", Some("content")).unwrap(),
            "."
        );
    }

    #[test]
    fn unmatched_marker_uses_whole_path() {
        assert_eq!(
            resolve("/root/org1/repo1/a/b/c.txt", "/root", Some("dummy")).unwrap(),
            "a/b/c.txt"
        );
    }

    #[test]
    fn empty_marker_behaves_like_none() {
        assert_eq!(resolve("/root/org/repo/a/b", "/root", Some("")).unwrap(), "a/b");
        assert_eq!(resolve("/root/org/repo/a/b", "/root", None).unwrap(), "a/b");
    }

    #[test]
    fn marker_longer_than_path_never_matches() {
        assert_eq!(
            resolve("/root/org/repo/x", "/root", Some("a/b/c/d/e/f")).unwrap(),
            "x"
        );
    }

    #[test]
    fn path_outside_root_is_rejected() {
        let err = resolve("/elsewhere/org/repo/main/f.yml", "/root", None).unwrap_err();
        assert!(matches!(err, SyncError::PathOutsideRoot { .. }));

        for escaping in ["/root/org/../../etc/passwd", "/root/org/repo/main/../../../../x.yml"] {
            let err = resolve(escaping, "/root", Some(".github/workflows")).unwrap_err();
            assert!(matches!(err, SyncError::PathOutsideRoot { .. }), "{escaping}: {err}");
        }
    }

    #[test]
    fn branch_directory_joins_repository_and_branch() {
        let root = Path::new("/srv");
        assert_eq!(
            branch_directory(root, "acme/svc", "feature/x"),
            PathBuf::from("/srv/acme/svc/feature/x")
        );
        assert_eq!(branch_directory(root, "acme/svc", "."), PathBuf::from("/srv/acme/svc"));
    }
}
