//! On-disk checkpoint persistence (spec §4.7.4): `<session_dir>/<session_id>/
//! checkpoint.json`, written on every phase entry and exit, using the same
//! write-temp-then-rename pattern as the Session Manager's `Store`, scaled
//! down to a single file instead of a directory hierarchy. Writes are
//! best-effort: failures are logged, never propagated (spec §4.7.4).

use std::path::PathBuf;

use agmux_types::SessionId;

use crate::error::Result;
use crate::types::Checkpoint;

pub struct CheckpointManager {
    base_dir: PathBuf,
    session_id: SessionId,
}

impl CheckpointManager {
    pub fn new(base_dir: impl Into<PathBuf>, session_id: SessionId) -> Self {
        Self { base_dir: base_dir.into(), session_id }
    }

    fn path(&self) -> PathBuf {
        self.base_dir.join(self.session_id.as_str()).join("checkpoint.json")
    }

    /// Best-effort write: logs and swallows any error (spec §4.7.4).
    pub async fn save(&self, checkpoint: &Checkpoint) {
        if let Err(err) = self.try_save(checkpoint).await {
            tracing::warn!(
                target: "agmux::planner::checkpoint",
                session_id = %self.session_id,
                error = %err,
                "failed to write checkpoint",
            );
        }
    }

    async fn try_save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Restores the last-written checkpoint, or `None` if one was never
    /// written (spec §4.7.4 "Restoring from checkpoint reinstates ...").
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let path = self.path();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlannerState;
    use chrono::Utc;
    use tempfile::TempDir;

    fn checkpoint(phase: PlannerState) -> Checkpoint {
        Checkpoint {
            phase,
            mission: "fix the flaky test".to_string(),
            last_updated: Utc::now(),
            total_cost: 0.42,
            iteration_count: 2,
            files_created: vec!["new.rs".to_string()],
            files_modified: vec!["lib.rs".to_string()],
            last_error: None,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mgr = CheckpointManager::new(dir.path(), SessionId::new("sess-1"));
        mgr.save(&checkpoint(PlannerState::Building)).await;

        let loaded = mgr.load().await.unwrap().unwrap();
        assert_eq!(loaded.phase, PlannerState::Building);
        assert_eq!(loaded.iteration_count, 2);
        assert_eq!(loaded.files_created, vec!["new.rs".to_string()]);
    }

    #[tokio::test]
    async fn load_returns_none_when_never_saved() {
        let dir = TempDir::new().unwrap();
        let mgr = CheckpointManager::new(dir.path(), SessionId::new("sess-2"));
        assert!(mgr.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn later_save_overwrites_earlier_one() {
        let dir = TempDir::new().unwrap();
        let mgr = CheckpointManager::new(dir.path(), SessionId::new("sess-3"));
        mgr.save(&checkpoint(PlannerState::Designing)).await;
        mgr.save(&checkpoint(PlannerState::Reviewing)).await;

        let loaded = mgr.load().await.unwrap().unwrap();
        assert_eq!(loaded.phase, PlannerState::Reviewing);
    }
}
