//! Real git repositories for integration tests.
//!
//! Remotes are bare repositories under `<tmp>/remotes/<owner>/<repo>.git`,
//! reached through `file://` URLs so shallow clones behave like network ones.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use runson_core::CommitIdentity;

pub const CI_WORKFLOW: &str = "\
name: ci
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
";

pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// `file://` base under which `remotes/<owner>/<repo>.git` live.
pub fn file_base(remotes: &Path) -> String {
    format!("file://{}", remotes.display())
}

/// Create a bare remote for `full_name` with the given branches, each
/// holding `.github/workflows/ci.yml` and a README.
pub fn seed_remote(remotes: &Path, full_name: &str, branches: &[&str]) -> PathBuf {
    let bare = remotes.join(format!("{full_name}.git"));
    fs::create_dir_all(&bare).unwrap();
    run_git(&bare, &["init", "--bare"]);

    let work = tempfile::tempdir().unwrap();
    let w = work.path();
    run_git(w, &["init"]);
    run_git(w, &["config", "user.name", "seed"]);
    run_git(w, &["config", "user.email", "seed@example.com"]);
    run_git(w, &["checkout", "-b", branches[0]]);
    fs::create_dir_all(w.join(".github/workflows")).unwrap();
    fs::write(w.join(".github/workflows/ci.yml"), CI_WORKFLOW).unwrap();
    fs::write(w.join("README.md"), "seed\n").unwrap();
    run_git(w, &["add", "."]);
    run_git(w, &["commit", "-m", "seed"]);
    let bare_arg = bare.to_string_lossy().into_owned();
    run_git(w, &["push", &bare_arg, &format!("HEAD:refs/heads/{}", branches[0])]);

    for branch in &branches[1..] {
        run_git(w, &["checkout", "-b", branch]);
        fs::write(w.join("README.md"), format!("{branch}\n")).unwrap();
        run_git(w, &["commit", "-am", branch]);
        run_git(w, &["push", &bare_arg, &format!("HEAD:refs/heads/{branch}")]);
    }
    bare
}

/// Contents of `object` (`<rev>:<path>`) in a bare repository.
pub fn show(bare: &Path, object: &str) -> String {
    run_git(bare, &["show", object])
}

pub fn rev_parse(bare: &Path, rev: &str) -> String {
    run_git(bare, &["rev-parse", rev]).trim().to_string()
}

pub fn identity() -> CommitIdentity {
    CommitIdentity {
        author: "runson-test".into(),
        email: "runson-test@example.com".into(),
        message: "Bulk workflow update [skip ci]".into(),
    }
}

/// A workflow with the given single runner label.
pub fn workflow_with_label(label: &str) -> String {
    CI_WORKFLOW.replace("ubuntu-latest", label)
}
