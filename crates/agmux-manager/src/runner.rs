//! Runners: the thing a `Session` drives to actually make progress. TUI-mode
//! sessions get a `ProviderRunner` wrapping an in-process `LongRunningProvider`
//! (spec §4.6 "an in-process `providerRunner`"); tmux-mode sessions get a
//! `TmuxRunner` that launches the peripheral CLI in a new tmux window (spec
//! §1 names the tmux-window helpers themselves as out-of-scope glue — this
//! is only the thin handle the Manager needs to hold one).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use agmux_providers::{AgentEvent, CancellationToken, ExecuteResult, LongRunningProvider};
use agmux_session::SessionModel;
use agmux_types::{OutputLine, OutputLineType, SessionStatus, ToolCallId, ToolState};

use crate::{Error, Result};

/// What the Manager actually talks to for one live session, independent of
/// whether it's backed by an in-process provider or a tmux window (spec
/// §4.6 "selects or constructs a runner").
#[async_trait]
pub trait Runner: Send + Sync {
    async fn send_message(&self, message: &str) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Applies one canonical `AgentEvent` directly to a `SessionModel`, for
/// backends that never go through the envelope-strip/Parser pipeline (spec
/// §4.6: "for non-NDJSON backends"). `turn_number` and `text_seen` are
/// shared with the runner's `send_message` path for the silent-provider
/// fallback (spec §4.6).
fn apply_agent_event(
    model: &SessionModel,
    turn_number: &AtomicU64,
    text_seen: &Arc<AtomicBool>,
    event: &AgentEvent,
) {
    match event {
        AgentEvent::Text { delta } => {
            text_seen.store(true, Ordering::SeqCst);
            model.append_streaming_text(delta);
        }
        AgentEvent::Thinking { delta } => {
            model.append_streaming_thinking(delta);
        }
        AgentEvent::ToolStart { name, call_id, input } => {
            let content = agmux_session::format_tool_content(name, input);
            model.append_output(OutputLine::tool_start(
                ToolCallId::new(call_id.clone()),
                name.clone(),
                content,
                Some(input.clone()),
            ));
            model.update_progress(|p| {
                p.current_tool = Some(name.clone());
                p.current_phase = "tool_execution".to_string();
            });
        }
        AgentEvent::ToolComplete {
            call_id,
            result,
            is_error,
            ..
        } => {
            let tool_id = ToolCallId::new(call_id.clone());
            model.update_tool(&tool_id, |line| {
                line.tool_result = Some(result.clone());
                line.is_error = *is_error;
                line.tool_state = Some(if *is_error { ToolState::Error } else { ToolState::Complete });
                if let Some(start) = line.start_time {
                    line.duration_ms =
                        Some((chrono::Utc::now() - start).num_milliseconds().max(0) as u64);
                }
            });
            model.update_progress(|p| p.clear_current_tool());
        }
        AgentEvent::TurnComplete {
            success,
            duration_ms,
            cost_usd,
            ..
        } => {
            let n = turn_number.fetch_add(1, Ordering::SeqCst) + 1;
            model.update_progress(|p| {
                p.total_cost_usd += cost_usd;
                p.turn_count = n;
                p.touch();
            });
            let mut line = OutputLine::new(OutputLineType::TurnEnd, "");
            line.is_error = !success;
            line.turn_number = Some(n);
            line.cost_usd = Some(*cost_usd);
            line.duration_ms = Some(*duration_ms);
            model.append_output(line);
            if *success {
                let _ = model.update_status(SessionStatus::Idle);
            }
        }
        AgentEvent::Error { error, context } => {
            let mut line = OutputLine::new(
                OutputLineType::Error,
                if context.is_empty() {
                    error.clone()
                } else {
                    format!("{error} ({context})")
                },
            );
            line.is_error = true;
            model.append_output(line);
        }
    }
}

/// Wraps an in-process `LongRunningProvider`: one background task consumes
/// its event stream and applies canonical events to the session model until
/// `stop()` signals it to exit (spec §4.6 "Event-bridge for providerRunner").
pub struct ProviderRunner {
    provider: Arc<dyn LongRunningProvider>,
    model: Arc<SessionModel>,
    cancel: CancellationToken,
    done: CancellationToken,
    event_task: Mutex<Option<JoinHandle<()>>>,
    turn_number: Arc<AtomicU64>,
    text_seen: Arc<AtomicBool>,
}

impl ProviderRunner {
    pub async fn start(provider: Arc<dyn LongRunningProvider>, model: Arc<SessionModel>) -> Result<Arc<Self>> {
        let cancel = CancellationToken::new();
        provider.start(cancel.clone()).await?;

        let done = CancellationToken::new();
        let text_seen = Arc::new(AtomicBool::new(false));
        let turn_number = Arc::new(AtomicU64::new(0));
        let events = provider.events();
        let task_model = model.clone();
        let task_done = done.clone();
        let task_text_seen = text_seen.clone();
        let task_turn_number = turn_number.clone();

        let event_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_done.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        apply_agent_event(&task_model, &task_turn_number, &task_text_seen, &event);
                    }
                }
            }
        });

        Ok(Arc::new(Self {
            provider,
            model,
            cancel,
            done,
            event_task: Mutex::new(Some(event_task)),
            turn_number,
            text_seen,
        }))
    }
}

#[async_trait]
impl Runner for ProviderRunner {
    async fn send_message(&self, message: &str) -> Result<()> {
        self.text_seen.store(false, Ordering::SeqCst);
        let result: ExecuteResult = self
            .provider
            .send_message(self.cancel.clone(), message)
            .await?;

        // Silent-provider fallback (spec §4.6): only append the final text
        // as a line if no `Text` event arrived for this turn.
        if !self.text_seen.load(Ordering::SeqCst) && !result.text.is_empty() {
            self.model.append_streaming_text(&result.text);
        }
        if !result.success {
            if let Some(err) = &result.error {
                let mut line = OutputLine::new(OutputLineType::Error, err.clone());
                line.is_error = true;
                self.model.append_output(line);
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.done.cancel();
        if let Some(task) = self.event_task.lock().await.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(10), task).await;
        }
        self.provider.stop().await?;
        self.provider.close().await?;
        Ok(())
    }
}

impl ProviderRunner {
    /// Number of turns completed so far, for callers reconciling progress
    /// after a stop.
    pub fn turn_count(&self) -> u64 {
        self.turn_number.load(Ordering::SeqCst)
    }
}

/// Launches the peripheral CLI in a new tmux window (spec §4.6 tmux-mode
/// runner). Output is not captured here — tmux mode hands the transcript to
/// the terminal, not to this process's `SessionModel` — matching the
/// spec's framing of tmux/terminal rendering as an external collaborator
/// (§1). This runner only owns enough of the window's lifecycle to send
/// follow-up keystrokes and to tear it down.
pub struct TmuxRunner {
    window_id: String,
}

impl TmuxRunner {
    /// Returns `Ok(None)` (not an error) when tmux itself is unavailable —
    /// callers decide whether that's fatal (spec §4.6 "fails if a tmux
    /// runner requires tmux and tmux is absent").
    pub fn tmux_available() -> bool {
        std::process::Command::new("tmux")
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn launch(program: &str, args: &[String], work_dir: &PathBuf, window_name: &str) -> Result<Self> {
        if !Self::tmux_available() {
            return Err(Error::lifecycle_guard("tmux runner requested but tmux is not available"));
        }
        let mut cmd = std::process::Command::new("tmux");
        cmd.args(["new-window", "-d", "-P", "-n", window_name, "-c"])
            .arg(work_dir)
            .arg(program)
            .args(args);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(Error::lifecycle_guard(format!(
                "tmux new-window failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let window_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self { window_id })
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }
}

#[async_trait]
impl Runner for TmuxRunner {
    async fn send_message(&self, message: &str) -> Result<()> {
        let status = std::process::Command::new("tmux")
            .args(["send-keys", "-t", &self.window_id, message, "Enter"])
            .status()?;
        if !status.success() {
            return Err(Error::lifecycle_guard("tmux send-keys failed"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = std::process::Command::new("tmux")
            .args(["kill-window", "-t", &self.window_id])
            .status();
        Ok(())
    }
}
