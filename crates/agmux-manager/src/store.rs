//! Persistent Store (spec §4.6.1): a directory hierarchy
//! `<root>/<repo>/<worktree>/<session_id>.json`, guarded by a mutex, with
//! atomic writes (write-temp-then-rename). Independent of the `Manager`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use agmux_types::{OutputLine, SessionId};

use crate::session::Session;
use crate::{Error, Result};

/// Replaces `/`, `\`, `:`, and whitespace with `_` so a repo/worktree/id
/// string is always a valid single path component.
pub fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// The on-disk shape of one session file (spec §6 persisted transcript
/// format). `extra` captures fields this version doesn't know about so a
/// save-after-load round-trip preserves forward-compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(flatten)]
    pub session: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_file_path: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputLine>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct Store {
    root: PathBuf,
    lock: Mutex<()>,
}

impl Store {
    pub fn new(root: PathBuf) -> Self {
        Self { root, lock: Mutex::new(()) }
    }

    fn session_dir(&self, repo: &str, worktree: &str) -> PathBuf {
        self.root.join(sanitize_component(repo)).join(sanitize_component(worktree))
    }

    fn session_path(&self, repo: &str, worktree: &str, id: &SessionId) -> PathBuf {
        self.session_dir(repo, worktree).join(format!("{}.json", sanitize_component(id.as_str())))
    }

    pub async fn save_session(&self, session: &Session, output: &[OutputLine]) -> Result<()> {
        if session.id.as_str().is_empty() || session.repo_name.is_empty() || session.worktree_name.is_empty() {
            return Err(Error::Store(
                "cannot save a session with an empty id, repo, or worktree".to_string(),
            ));
        }

        let _guard = self.lock.lock().await;
        let dir = self.session_dir(&session.repo_name, &session.worktree_name);
        std::fs::create_dir_all(&dir)?;

        let stored = StoredSession {
            session: session.clone(),
            plan_file_path: None,
            output: output.to_vec(),
            extra: Map::new(),
        };
        let content = serde_json::to_vec_pretty(&stored)?;

        let path = self.session_path(&session.repo_name, &session.worktree_name, &session.id);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub async fn load_session(&self, repo: &str, worktree: &str, id: &SessionId) -> Result<StoredSession> {
        let _guard = self.lock.lock().await;
        let path = self.session_path(repo, worktree, id);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Store(format!("session file not found at {}: {e}", path.display())))?;
        let stored: StoredSession = serde_json::from_str(&content)?;
        Ok(stored)
    }

    pub async fn delete_session(&self, repo: &str, worktree: &str, id: &SessionId) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.session_path(repo, worktree, id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Sessions for one repo/worktree, newest-first by `created_at`.
    pub async fn list_sessions(&self, repo: &str, worktree: &str) -> Result<Vec<Session>> {
        let _guard = self.lock.lock().await;
        let dir = self.session_dir(repo, worktree);
        let mut sessions = read_session_files(&dir)?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub async fn list_all_sessions(&self) -> Result<Vec<Session>> {
        let _guard = self.lock.lock().await;
        let mut all = Vec::new();
        if !self.root.exists() {
            return Ok(all);
        }
        for repo_entry in std::fs::read_dir(&self.root)?.filter_map(|e| e.ok()) {
            if !repo_entry.path().is_dir() {
                continue;
            }
            for worktree_entry in std::fs::read_dir(repo_entry.path())?.filter_map(|e| e.ok()) {
                if worktree_entry.path().is_dir() {
                    all.extend(read_session_files(&worktree_entry.path())?);
                }
            }
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    pub async fn list_repos(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut repos: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        repos.sort();
        Ok(repos)
    }

    pub async fn list_worktrees(&self, repo: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let dir = self.root.join(sanitize_component(repo));
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut worktrees: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        worktrees.sort();
        Ok(worktrees)
    }
}

fn read_session_files(dir: &Path) -> Result<Vec<Session>> {
    let mut sessions = Vec::new();
    if !dir.exists() {
        return Ok(sessions);
    }
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<StoredSession>(&content) {
            Ok(stored) => sessions.push(stored.session),
            Err(e) => tracing::warn!(target: "agmux::store", path = %path.display(), error = %e, "skipping unparseable session file"),
        }
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionType;
    use chrono::Utc;
    use tempfile::TempDir;

    fn session(id: &str, repo: &str, worktree: &str) -> Session {
        Session::new(
            SessionId::new(id),
            SessionType::Builder,
            repo,
            PathBuf::from("/work/repo"),
            worktree,
            "fix the bug",
            "sonnet",
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips_metadata_and_output_length() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let s = session("sess-1", "repo-a", "main");
        let output = vec![OutputLine::text("hello")];

        store.save_session(&s, &output).await.unwrap();
        let loaded = store.load_session("repo-a", "main", &s.id).await.unwrap();

        assert_eq!(loaded.session.id, s.id);
        assert_eq!(loaded.session.title, s.title);
        assert_eq!(loaded.output.len(), output.len());
    }

    #[tokio::test]
    async fn save_rejects_empty_repo_or_worktree() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let s = session("sess-2", "", "main");
        let err = store.save_session(&s, &[]).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn list_sessions_sorts_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let mut older = session("sess-old", "repo-a", "main");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        let newer = session("sess-new", "repo-a", "main");

        store.save_session(&older, &[]).await.unwrap();
        store.save_session(&newer, &[]).await.unwrap();

        let listed = store.list_sessions("repo-a", "main").await.unwrap();
        assert_eq!(listed[0].id.as_str(), "sess-new");
        assert_eq!(listed[1].id.as_str(), "sess-old");
    }

    #[tokio::test]
    async fn sanitizes_path_components_with_slashes() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let s = session("sess-3", "org/repo", "feature branch");
        store.save_session(&s, &[]).await.unwrap();

        let listed = store.list_sessions("org/repo", "feature branch").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn delete_then_load_fails() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let s = session("sess-4", "repo-a", "main");
        store.save_session(&s, &[]).await.unwrap();
        store.delete_session("repo-a", "main", &s.id).await.unwrap();
        assert!(store.load_session("repo-a", "main", &s.id).await.is_err());
    }
}
