use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Finite status set for a session (spec §3). `Idle` means "waiting for
/// follow-up user input". The terminal set is `{Completed, Failed, Stopped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Idle,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
        )
    }
}

/// Session metadata, independent of transcript content (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    #[serde(default)]
    pub session_id: SessionId,
    pub model: String,
    pub cwd: String,
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub status: SessionStatus,
}

fn default_permission_mode() -> String {
    "default".to_string()
}

impl Default for SessionId {
    fn default() -> Self {
        SessionId::new("")
    }
}

impl SessionMeta {
    pub fn new(model: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(""),
            model: model.into(),
            cwd: cwd.into(),
            permission_mode: default_permission_mode(),
            tools: Vec::new(),
            agents: Vec::new(),
            skills: Vec::new(),
            status: SessionStatus::Pending,
        }
    }
}
