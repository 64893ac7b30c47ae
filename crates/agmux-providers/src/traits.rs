use std::path::PathBuf;
use std::sync::Arc;

use agmux_types::Usage;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::cancellation::CancellationToken;
use crate::event::AgentEvent;
use crate::Result;

/// `"default" | "plan" | "bypass"` (spec §4.1). Backends that can't map a
/// mode ignore it rather than error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    Default,
    Plan,
    Bypass,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Default
    }
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::Plan => "plan",
            PermissionMode::Bypass => "bypass",
        }
    }
}

/// Synchronous per-call sink for canonical events (spec §4.1 `EventHandler`
/// option, §4.3 "per-call handler dispatch"). Implementations must be fast
/// and non-reentrant, mirroring the Session Model's observer contract.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &AgentEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&AgentEvent) + Send + Sync,
{
    fn handle(&self, event: &AgentEvent) {
        self(event)
    }
}

/// Recognized options for one `Execute`/`Start` call, built functional-options
/// style (spec §4.1 table). Each backend ignores options it cannot honor.
#[derive(Clone, Default)]
pub struct ExecuteConfig {
    pub model: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub system_prompt: Option<String>,
    pub permission_mode: PermissionMode,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecuteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Default model when the caller doesn't pick one (spec §4.1: `"sonnet"`).
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or("sonnet")
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn max_budget_usd(mut self, budget: f64) -> Self {
        self.max_budget_usd = Some(budget);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }
}

/// Outcome of one turn (spec §4.1 `Result`). Missing fields default to zero
/// — the `rpc` backend, for instance, never reports usage/cost/cache tokens.
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    pub text: String,
    pub thinking: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub usage: Usage,
}

impl ExecuteResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
            ..Default::default()
        }
    }
}

/// Handle onto a provider's outbound event channel. Cheap to clone (shares
/// the receiver behind a mutex); intended for a single logical consumer, as
/// the spec's "single consumer of the source channel" invariant requires one
/// bridge per subprocess, not one consumer per clone of this handle.
#[derive(Clone)]
pub struct EventStream {
    rx: Arc<Mutex<mpsc::Receiver<AgentEvent>>>,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<AgentEvent>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Waits for the next event, or `None` once the channel is closed.
    pub async fn recv(&self) -> Option<AgentEvent> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking poll, for callers that must never await here.
    pub fn try_recv(&self) -> Option<AgentEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

/// A backend exposing one normalized turn-execution surface (spec §4.1).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// One-shot turn. `cancel` is decoupled from the subprocess's own
    /// lifetime — cancelling this call must not kill a shared subprocess
    /// (spec §4.3 "Lazy init").
    async fn execute(
        &self,
        cancel: CancellationToken,
        prompt: &str,
        config: ExecuteConfig,
    ) -> Result<ExecuteResult>;

    /// Asynchronous event stream; may never yield anything for backends that
    /// can't stream (the `oneshot` backend).
    fn events(&self) -> EventStream;

    /// Releases all subprocess and task resources. Must return within a
    /// bounded time (spec §4.3, §5: 10s) even if the subprocess hangs.
    async fn close(&self) -> Result<()>;
}

/// Extension for backends that keep one subprocess session alive across
/// multiple turns (spec §4.1 `LongRunningProvider`).
#[async_trait]
pub trait LongRunningProvider: Provider {
    /// Eagerly spawns the subprocess and starts its bridge task.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Issues a turn on the already-started session. Callable only between
    /// `start` and `stop`.
    async fn send_message(&self, cancel: CancellationToken, message: &str) -> Result<ExecuteResult>;

    /// Ends the underlying session without releasing bridge/channel
    /// resources (that's `close`'s job).
    async fn stop(&self) -> Result<()>;
}
