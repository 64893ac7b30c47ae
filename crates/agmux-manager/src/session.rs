//! `Session`: the Manager's per-session record (spec §3 "Session (owned by
//! Manager)"). Distinct from `agmux_session::SessionModel`, which owns the
//! live transcript — this type is the lifecycle/bookkeeping record the
//! Manager and Store trade in.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agmux_types::{ProgressSnapshot, SessionId, SessionStatus};

use crate::{Error, Result};

const TITLE_MAX_CHARS: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Planner,
    Builder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Tui,
    Tmux,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub repo_name: String,
    pub worktree_path: PathBuf,
    pub worktree_name: String,
    pub prompt: String,
    pub title: String,
    pub model: String,
    pub progress: ProgressSnapshot,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_type: Option<RunnerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_window: Option<String>,
}

impl Session {
    pub fn new(
        id: SessionId,
        session_type: SessionType,
        repo_name: impl Into<String>,
        worktree_path: PathBuf,
        worktree_name: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let prompt = prompt.into();
        let title = derive_title(&prompt);
        Self {
            id,
            session_type,
            status: SessionStatus::Pending,
            repo_name: repo_name.into(),
            worktree_path,
            worktree_name: worktree_name.into(),
            prompt,
            title,
            model: model.into(),
            progress: ProgressSnapshot::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_msg: None,
            runner_type: None,
            tmux_window: None,
        }
    }

    /// Guards the Manager's own bookkeeping status the same way
    /// `SessionModel::update_status` guards the transcript's status (spec
    /// §8 "at most one transition ... into each terminal state"): once
    /// terminal, stays terminal. Also stamps `started_at`/`completed_at`
    /// so the Store persists when each phase began.
    pub fn transition(&mut self, new: SessionStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::lifecycle_guard(format!(
                "cannot transition session {} from terminal status {:?}",
                self.id, self.status
            )));
        }
        if new == SessionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if new.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = new;
        Ok(())
    }
}

/// First line of the prompt, truncated to a bounded length (spec §3
/// "title (derived from prompt, bounded length)").
fn derive_title(prompt: &str) -> String {
    let first_line = prompt.lines().next().unwrap_or("").trim();
    let chars: Vec<char> = first_line.chars().collect();
    if chars.len() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }
    let mut title: String = chars[..TITLE_MAX_CHARS].iter().collect();
    title.push_str("...");
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_uses_first_line_only() {
        assert_eq!(derive_title("Fix the login bug\nmore detail here"), "Fix the login bug");
    }

    #[test]
    fn title_truncates_long_prompts() {
        let prompt = "x".repeat(200);
        let title = derive_title(&prompt);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    fn session() -> Session {
        Session::new(
            SessionId::new("s1"),
            SessionType::Builder,
            "repo",
            PathBuf::from("/work"),
            "main",
            "fix bug",
            "sonnet",
        )
    }

    #[test]
    fn transition_rejects_leaving_terminal_status() {
        let mut s = session();
        s.transition(SessionStatus::Running).unwrap();
        s.transition(SessionStatus::Completed).unwrap();
        let err = s.transition(SessionStatus::Running).unwrap_err();
        assert!(err.to_string().contains("terminal"));
        assert_eq!(s.status, SessionStatus::Completed);
    }

    #[test]
    fn transition_stamps_started_and_completed() {
        let mut s = session();
        assert!(s.started_at.is_none());
        s.transition(SessionStatus::Running).unwrap();
        assert!(s.started_at.is_some());
        assert!(s.completed_at.is_none());
        s.transition(SessionStatus::Idle).unwrap();
        s.transition(SessionStatus::Completed).unwrap();
        assert!(s.completed_at.is_some());
    }
}
