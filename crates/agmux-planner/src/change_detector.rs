//! File-change detection for sub-agents that don't emit file-edit tool
//! events (spec §4.7.2: "file changes are detected by invoking `git diff
//! --name-status HEAD` ... inside the work directory after the sub-agent
//! returns; the change set is the contract between the Planner and the git
//! collaborator"). Injected as a trait so the Planner core has no direct
//! dependency on the `git` binary beyond the one default implementation.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::FileChangeSet;

#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Files changed in `work_dir` relative to `HEAD`, covering committed,
    /// staged, and untracked files (spec §4.7.2 "and an equivalent for
    /// staged + untracked").
    async fn detect(&self, work_dir: &Path) -> Result<FileChangeSet>;
}

/// Default `ChangeDetector`: shells out to `git diff --name-status HEAD`
/// for tracked changes and `git ls-files --others --exclude-standard` for
/// untracked files.
pub struct GitChangeDetector;

#[async_trait]
impl ChangeDetector for GitChangeDetector {
    async fn detect(&self, work_dir: &Path) -> Result<FileChangeSet> {
        let work_dir = work_dir.to_path_buf();
        tokio::task::spawn_blocking(move || detect_blocking(&work_dir))
            .await
            .map_err(|e| Error::ChangeDetector(format!("change detector task panicked: {e}")))?
    }
}

fn detect_blocking(work_dir: &Path) -> Result<FileChangeSet> {
    let mut created = Vec::new();
    let mut modified = Vec::new();

    let diff = run_git(work_dir, &["diff", "--name-status", "HEAD"])?;
    for line in diff.lines() {
        let mut parts = line.splitn(2, char::is_whitespace);
        let Some(status) = parts.next() else { continue };
        let Some(path) = parts.next() else { continue };
        let path = path.trim().to_string();
        if path.is_empty() {
            continue;
        }
        match status.chars().next() {
            Some('A') => created.push(path),
            _ => modified.push(path),
        }
    }

    let untracked = run_git(work_dir, &["ls-files", "--others", "--exclude-standard"])?;
    for line in untracked.lines() {
        let path = line.trim();
        if !path.is_empty() {
            created.push(path.to_string());
        }
    }

    Ok(FileChangeSet { created, modified })
}

fn run_git(work_dir: &Path, args: &[&str]) -> Result<String> {
    let output = std::process::Command::new("git")
        .current_dir(work_dir)
        .args(args)
        .output()
        .map_err(|e| Error::ChangeDetector(format!("failed to spawn git: {e}")))?;
    if !output.status.success() {
        return Err(Error::ChangeDetector(format!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            assert!(Command::new("git").current_dir(dir.path()).args(args).status().unwrap().success());
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        run(&["add", "a.txt"]);
        run(&["commit", "-q", "-m", "init"]);
        dir
    }

    #[tokio::test]
    async fn detects_modified_and_new_files() {
        let dir = init_repo();
        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        std::fs::write(dir.path().join("b.txt"), "new").unwrap();

        let set = GitChangeDetector.detect(dir.path()).await.unwrap();
        assert!(set.modified.contains(&"a.txt".to_string()));
        assert!(set.created.contains(&"b.txt".to_string()));
    }

    #[tokio::test]
    async fn detects_staged_additions_as_created() {
        let dir = init_repo();
        std::fs::write(dir.path().join("c.txt"), "staged").unwrap();
        assert!(Command::new("git")
            .current_dir(dir.path())
            .args(["add", "c.txt"])
            .status()
            .unwrap()
            .success());

        let set = GitChangeDetector.detect(dir.path()).await.unwrap();
        assert!(set.created.contains(&"c.txt".to_string()));
    }
}
