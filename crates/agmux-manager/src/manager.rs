//! The Session Manager (spec §4.6): owns a `SessionID → Session` map, a
//! `SessionID → SessionModel` map (each model owning its own output ring),
//! an event fan-out channel, and optionally a persistent `Store`.
//!
//! Locking discipline (spec §5: session map and output-ring map never
//! nested in the wrong order) -- the output ring lives inside each
//! session's own `SessionModel`, so there is nothing to nest: a lookup
//! under the session map's lock hands back an `Arc` whose own internal
//! lock is taken only after the session map's lock has already been
//! released.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use agmux_providers::LongRunningProvider;
use agmux_session::{SessionEvent, SessionModel};
use agmux_types::{OutputLine, ProgressSnapshot, SessionId, SessionMeta, SessionStatus};

use crate::runner::{ProviderRunner, Runner, TmuxRunner};
use crate::session::{RunnerKind, Session, SessionType};
use crate::store::Store;
use crate::{Error, Result};

/// Fan-out notification: one `SessionEvent` tagged with the session it
/// belongs to (spec §4.6 "an event fan-out channel").
#[derive(Debug, Clone)]
pub struct ManagerEvent {
    pub session_id: SessionId,
    pub event: SessionEvent,
}

/// Depth of the broadcast channel backing `Manager::events()`. A slow
/// subscriber (a detached TUI) lags and drops rather than stalling a
/// session's writer task.
const EVENTS_CHANNEL_DEPTH: usize = 1024;

/// Injected so the Manager never hardcodes a concrete backend (spec §4.1
/// names three backend kinds abstractly; the Manager only needs "give me a
/// `LongRunningProvider` for this model").
pub trait ProviderFactory: Send + Sync {
    fn create(&self, model: &str) -> Result<Arc<dyn LongRunningProvider>>;
}

/// How to launch a tmux-mode runner (program + args), since the Manager
/// itself has no opinion on which CLI binary backs a tmux window.
#[derive(Debug, Clone)]
pub struct TmuxLaunchConfig {
    pub program: String,
    pub args: Vec<String>,
}

struct ManagedSession {
    record: RwLock<Session>,
    model: Arc<SessionModel>,
    runner: Arc<dyn Runner>,
}

/// The process-wide registry of live sessions (spec §4.6).
pub struct Manager {
    sessions: RwLock<HashMap<SessionId, Arc<ManagedSession>>>,
    events_tx: broadcast::Sender<ManagerEvent>,
    store: Option<Arc<Store>>,
    provider_factory: Arc<dyn ProviderFactory>,
    tmux_launch: Option<TmuxLaunchConfig>,
}

impl Manager {
    pub fn new(provider_factory: Arc<dyn ProviderFactory>, store: Option<Arc<Store>>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENTS_CHANNEL_DEPTH);
        Self {
            sessions: RwLock::new(HashMap::new()),
            events_tx,
            store,
            provider_factory,
            tmux_launch: None,
        }
    }

    pub fn with_tmux_launch(mut self, launch: TmuxLaunchConfig) -> Self {
        self.tmux_launch = Some(launch);
        self
    }

    /// Whether this Manager would actually start tmux-mode sessions (tmux
    /// binary present and a launch config configured), not whether any
    /// individual session happens to be tmux-backed.
    pub fn is_in_tmux_mode(&self) -> bool {
        self.tmux_launch.is_some() && TmuxRunner::tmux_available()
    }

    pub fn events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events_tx.subscribe()
    }

    fn forward_events(&self, id: SessionId, model: &SessionModel) {
        let tx = self.events_tx.clone();
        model.subscribe(Arc::new(move |event: &SessionEvent| {
            let _ = tx.send(ManagerEvent { session_id: id.clone(), event: event.clone() });
        }));
    }

    /// Allocates a session, selects/constructs its runner, transitions
    /// `pending → running`, and registers it (spec §4.6 "Creation").
    #[allow(clippy::too_many_arguments)]
    pub async fn start_session(
        &self,
        session_type: SessionType,
        repo_name: impl Into<String>,
        worktree_path: PathBuf,
        worktree_name: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
        runner_kind: RunnerKind,
    ) -> Result<SessionId> {
        let model_name = model.into();
        let id = SessionId::new(uuid::Uuid::new_v4().to_string());
        let mut record = Session::new(
            id.clone(),
            session_type,
            repo_name,
            worktree_path.clone(),
            worktree_name,
            prompt,
            model_name.clone(),
        );

        let mut meta = SessionMeta::new(model_name.clone(), worktree_path.display().to_string());
        meta.session_id = id.clone();
        let session_model = Arc::new(SessionModel::new(meta, agmux_session::DEFAULT_CAPACITY));
        self.forward_events(id.clone(), &session_model);

        let mut tmux_window = None;
        let runner: Arc<dyn Runner> = match runner_kind {
            RunnerKind::Tui => {
                let provider = self.provider_factory.create(&model_name)?;
                ProviderRunner::start(provider, session_model.clone()).await?
            }
            RunnerKind::Tmux => {
                let launch = self
                    .tmux_launch
                    .as_ref()
                    .ok_or_else(|| Error::lifecycle_guard("no tmux launch configuration registered"))?;
                if !TmuxRunner::tmux_available() {
                    return Err(Error::lifecycle_guard("tmux runner requested but tmux is not installed"));
                }
                let window_name = format!("agmux-{}", &id.as_str()[..8.min(id.as_str().len())]);
                let tmux = TmuxRunner::launch(&launch.program, &launch.args, &worktree_path, &window_name)?;
                tmux_window = Some(tmux.window_id().to_string());
                Arc::new(tmux)
            }
        };

        record.transition(SessionStatus::Running)?;
        record.runner_type = Some(runner_kind);
        record.tmux_window = tmux_window;
        let _ = session_model.update_status(SessionStatus::Running);

        let managed = Arc::new(ManagedSession {
            record: RwLock::new(record),
            model: session_model,
            runner,
        });
        self.sessions.write().await.insert(id.clone(), managed);
        Ok(id)
    }

    async fn get(&self, id: &SessionId) -> Result<Arc<ManagedSession>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    /// Allowed only when the session is `idle` (spec §4.6 "Interaction").
    pub async fn send_follow_up(&self, id: &SessionId, message: &str) -> Result<()> {
        let managed = self.get(id).await?;
        {
            let mut record = managed.record.write().await;
            if record.status != SessionStatus::Idle {
                return Err(Error::lifecycle_guard(format!(
                    "cannot send follow-up: session {} is {:?}, not idle",
                    id, record.status
                )));
            }
            record.transition(SessionStatus::Running)?;
        }
        let _ = managed.model.update_status(SessionStatus::Running);
        managed.runner.send_message(message).await
    }

    /// Allowed only from `idle` (spec §4.6 "Interaction").
    pub async fn complete_session(&self, id: &SessionId) -> Result<()> {
        let managed = self.get(id).await?;
        let mut record = managed.record.write().await;
        if record.status != SessionStatus::Idle {
            return Err(Error::lifecycle_guard(format!(
                "cannot complete: session {} is {:?}, not idle",
                id, record.status
            )));
        }
        record.transition(SessionStatus::Completed)?;
        drop(record);
        let _ = managed.model.update_status(SessionStatus::Completed);
        self.persist(&managed).await;
        Ok(())
    }

    /// Requests the runner to stop and transitions to `stopped`. Idempotent
    /// on already-terminal sessions (spec §4.6 "Termination").
    pub async fn stop_session(&self, id: &SessionId) -> Result<()> {
        let managed = self.get(id).await?;
        {
            let record = managed.record.read().await;
            if record.status.is_terminal() {
                return Ok(());
            }
        }
        managed.runner.stop().await?;
        let mut record = managed.record.write().await;
        record.transition(SessionStatus::Stopped)?;
        drop(record);
        let _ = managed.model.update_status(SessionStatus::Stopped);
        self.persist(&managed).await;
        Ok(())
    }

    /// Requires a terminal status (spec §4.6 "Deletion").
    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        let managed = self.get(id).await?;
        {
            let record = managed.record.read().await;
            if !record.status.is_terminal() {
                return Err(Error::lifecycle_guard(format!(
                    "cannot delete: session {} is {:?}, not terminal",
                    id, record.status
                )));
            }
        }
        if let Some(store) = &self.store {
            let record = managed.record.read().await;
            let _ = store.delete_session(&record.repo_name, &record.worktree_name, id).await;
        }
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn persist(&self, managed: &ManagedSession) {
        let Some(store) = &self.store else { return };
        let record = managed.record.read().await.clone();
        let output = managed.model.output();
        if let Err(err) = store.save_session(&record, &output).await {
            tracing::warn!(target: "agmux::manager", session_id = %record.id, error = %err, "failed to persist session");
        }
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<Session> {
        Ok(self.get(id).await?.record.read().await.clone())
    }

    pub async fn get_session_info(&self, id: &SessionId) -> Result<(Session, ProgressSnapshot)> {
        let managed = self.get(id).await?;
        let record = managed.record.read().await.clone();
        let progress = managed.model.progress();
        Ok((record, progress))
    }

    pub async fn get_session_output(&self, id: &SessionId) -> Result<Vec<OutputLine>> {
        Ok(self.get(id).await?.model.output())
    }

    /// Matches on exact worktree path, never branch name — renaming the
    /// branch inside a worktree must not lose its sessions (spec §4.6
    /// "Introspection").
    pub async fn get_sessions_for_worktree(&self, path: &Path) -> Vec<Session> {
        let mut out = Vec::new();
        for managed in self.sessions.read().await.values() {
            let record = managed.record.read().await;
            if record.worktree_path == path {
                out.push(record.clone());
            }
        }
        out
    }

    pub async fn get_all_sessions(&self) -> Vec<Session> {
        let mut out = Vec::new();
        for managed in self.sessions.read().await.values() {
            out.push(managed.record.read().await.clone());
        }
        out
    }

    pub async fn count_by_status(&self) -> HashMap<SessionStatus, usize> {
        let mut counts = HashMap::new();
        for managed in self.sessions.read().await.values() {
            let status = managed.record.read().await.status;
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }

    /// Delegates to the Store (spec §4.6 "History").
    pub async fn load_history_sessions(&self, repo_name: &str, worktree_name: &str) -> Result<Vec<Session>> {
        let store = self.store.as_ref().ok_or_else(|| Error::Store("no Store configured".to_string()))?;
        store.list_sessions(repo_name, worktree_name).await
    }

    pub async fn load_session_from_history(
        &self,
        repo_name: &str,
        worktree_name: &str,
        id: &SessionId,
    ) -> Result<crate::store::StoredSession> {
        let store = self.store.as_ref().ok_or_else(|| Error::Store("no Store configured".to_string()))?;
        store.load_session(repo_name, worktree_name, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmux_providers::{CancellationToken, EventStream, ExecuteConfig, ExecuteResult, Provider};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NullProvider;

    #[async_trait]
    impl Provider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }
        async fn execute(
            &self,
            _cancel: CancellationToken,
            _prompt: &str,
            _config: ExecuteConfig,
        ) -> agmux_providers::Result<ExecuteResult> {
            Ok(ExecuteResult::ok("done"))
        }
        fn events(&self) -> EventStream {
            EventStream::new(mpsc::channel(1).1)
        }
        async fn close(&self) -> agmux_providers::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl LongRunningProvider for NullProvider {
        async fn start(&self, _cancel: CancellationToken) -> agmux_providers::Result<()> {
            Ok(())
        }
        async fn send_message(
            &self,
            _cancel: CancellationToken,
            message: &str,
        ) -> agmux_providers::Result<ExecuteResult> {
            Ok(ExecuteResult::ok(format!("echo: {message}")))
        }
        async fn stop(&self) -> agmux_providers::Result<()> {
            Ok(())
        }
    }

    struct NullFactory;
    impl ProviderFactory for NullFactory {
        fn create(&self, _model: &str) -> Result<Arc<dyn LongRunningProvider>> {
            Ok(Arc::new(NullProvider))
        }
    }

    fn manager() -> Manager {
        Manager::new(Arc::new(NullFactory), None)
    }

    #[tokio::test]
    async fn start_session_transitions_to_running() {
        let m = manager();
        let id = m
            .start_session(
                SessionType::Builder,
                "repo",
                PathBuf::from("/work"),
                "main",
                "fix bug",
                "sonnet",
                RunnerKind::Tui,
            )
            .await
            .unwrap();
        let session = m.get_session(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn send_follow_up_rejected_when_not_idle() {
        let m = manager();
        let id = m
            .start_session(
                SessionType::Builder,
                "repo",
                PathBuf::from("/work"),
                "main",
                "fix bug",
                "sonnet",
                RunnerKind::Tui,
            )
            .await
            .unwrap();
        let err = m.send_follow_up(&id, "more").await.unwrap_err();
        assert!(err.to_string().contains("not idle"));
    }

    #[tokio::test]
    async fn delete_requires_terminal_status() {
        let m = manager();
        let id = m
            .start_session(
                SessionType::Builder,
                "repo",
                PathBuf::from("/work"),
                "main",
                "fix bug",
                "sonnet",
                RunnerKind::Tui,
            )
            .await
            .unwrap();
        let err = m.delete_session(&id).await.unwrap_err();
        assert!(err.to_string().contains("not terminal"));

        m.stop_session(&id).await.unwrap();
        m.delete_session(&id).await.unwrap();
        assert!(m.get_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn stop_session_is_idempotent_once_terminal() {
        let m = manager();
        let id = m
            .start_session(
                SessionType::Builder,
                "repo",
                PathBuf::from("/work"),
                "main",
                "fix bug",
                "sonnet",
                RunnerKind::Tui,
            )
            .await
            .unwrap();
        m.stop_session(&id).await.unwrap();
        m.stop_session(&id).await.unwrap();
        assert_eq!(m.get_session(&id).await.unwrap().status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn get_sessions_for_worktree_matches_exact_path() {
        let m = manager();
        let id = m
            .start_session(
                SessionType::Builder,
                "repo",
                PathBuf::from("/work/tree-a"),
                "branch-renamed-later",
                "fix bug",
                "sonnet",
                RunnerKind::Tui,
            )
            .await
            .unwrap();
        let matches = m.get_sessions_for_worktree(Path::new("/work/tree-a")).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, id);
        assert!(m.get_sessions_for_worktree(Path::new("/work/tree-b")).await.is_empty());
    }
}
