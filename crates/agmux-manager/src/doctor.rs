//! Store consistency checks (SPEC_FULL.md §4.6 supplement): scans the Store
//! for sessions referencing worktree paths that no longer exist on disk,
//! and can repair the store by deleting anything it flags.

use agmux_types::SessionId;

use crate::session::Session;
use crate::store::Store;
use crate::Result;

/// One finding from a doctor scan: a session whose `worktree_path` no
/// longer exists on disk.
#[derive(Debug, Clone)]
pub struct DanglingSession {
    pub session_id: SessionId,
    pub repo_name: String,
    pub worktree_name: String,
    pub worktree_path: std::path::PathBuf,
}

/// Summary of one `check` pass.
#[derive(Debug, Clone, Default)]
pub struct DoctorReport {
    pub scanned: usize,
    pub dangling: Vec<DanglingSession>,
}

impl DoctorReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
    }
}

/// Read-only scan: every session in `store` whose `worktree_path` fails an
/// existence check is reported, nothing is deleted.
pub async fn check(store: &Store) -> Result<DoctorReport> {
    let sessions = store.list_all_sessions().await?;
    let mut report = DoctorReport { scanned: sessions.len(), dangling: Vec::new() };
    for session in sessions {
        if !session.worktree_path.exists() {
            report.dangling.push(dangling_from(&session));
        }
    }
    Ok(report)
}

/// Deletes every session flagged by a prior `check` (or a fresh scan if
/// `report` is `None`). Returns the sessions actually removed.
pub async fn repair(store: &Store, report: Option<DoctorReport>) -> Result<Vec<DanglingSession>> {
    let report = match report {
        Some(r) => r,
        None => check(store).await?,
    };
    for entry in &report.dangling {
        store.delete_session(&entry.repo_name, &entry.worktree_name, &entry.session_id).await?;
    }
    Ok(report.dangling)
}

fn dangling_from(session: &Session) -> DanglingSession {
    DanglingSession {
        session_id: session.id.clone(),
        repo_name: session.repo_name.clone(),
        worktree_name: session.worktree_name.clone(),
        worktree_path: session.worktree_path.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionType;
    use agmux_types::SessionId as Id;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn session(id: &str, worktree_path: PathBuf) -> Session {
        Session::new(Id::new(id), SessionType::Builder, "repo-a", worktree_path, "main", "fix bug", "sonnet")
    }

    #[tokio::test]
    async fn check_flags_sessions_with_missing_worktree() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());

        let live_worktree = dir.path().join("live");
        std::fs::create_dir_all(&live_worktree).unwrap();

        let live = session("sess-live", live_worktree);
        let gone = session("sess-gone", dir.path().join("does-not-exist"));
        store.save_session(&live, &[]).await.unwrap();
        store.save_session(&gone, &[]).await.unwrap();

        let report = check(&store).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.dangling.len(), 1);
        assert_eq!(report.dangling[0].session_id.as_str(), "sess-gone");
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn check_reports_clean_when_all_worktrees_exist() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path().join("live")).unwrap();
        store.save_session(&session("sess-1", dir.path().join("live")), &[]).await.unwrap();

        let report = check(&store).await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn repair_deletes_only_dangling_sessions() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path().join("live")).unwrap();

        let live = session("sess-live", dir.path().join("live"));
        let gone = session("sess-gone", dir.path().join("does-not-exist"));
        store.save_session(&live, &[]).await.unwrap();
        store.save_session(&gone, &[]).await.unwrap();

        let removed = repair(&store, None).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].session_id.as_str(), "sess-gone");

        let remaining = store.list_all_sessions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "sess-live");
    }
}
