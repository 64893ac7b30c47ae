//! `rpc` backend: a bidirectional transport over one shared subprocess where
//! every inbound event carries a `thread_id` (spec §4.1 "bidirectional RPC
//! transport", §4.2 step 2 "scoped dispatch"). One `RpcTransport` may back
//! many `RpcProvider` instances, each scoped to its own thread — this is the
//! multiplexed-transport path the generic bridge's `Scoped` capability check
//! exists for (spec §9). A single reader task owns stdout exclusively and
//! fans inbound lines out by thread id; writers correlate replies the same
//! way any stdin/stdout line-pump transport does (see `DESIGN.md`).

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};

use agmux_types::Usage;

use crate::bridge::{run_bridge, BridgeConfig, SharedEventHandler};
use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::event::{AgentEvent, NativeEvent, StreamEventKind};
use crate::traits::{
    EventHandler, EventStream, ExecuteConfig, ExecuteResult, LongRunningProvider, Provider,
};

const POST_TURN_DRAIN: Duration = Duration::from_millis(100);
/// Depth of the broadcast channel backing the shared transport. A slow
/// per-thread subscriber lags and drops rather than stalling the reader.
const BROADCAST_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct RpcLaunchConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the shared subprocess (spec §4.1 `WorkDir`).
    /// Applied once, at spawn time — the transport's subprocess is shared
    /// across every `RpcProvider` thread, so there is no later point at
    /// which a single call could still change it.
    pub work_dir: Option<std::path::PathBuf>,
}

/// One event read off the shared transport, always carrying the thread it
/// belongs to (spec §4.2 step 2: `Scoped` capability).
#[derive(Clone)]
struct RpcNativeEvent {
    thread_id: String,
    body: Value,
}

impl NativeEvent for RpcNativeEvent {
    fn scope_id(&self) -> Option<&str> {
        Some(&self.thread_id)
    }

    fn classify(self) -> StreamEventKind {
        let v = self.body;
        match v.get("type").and_then(Value::as_str) {
            Some("text") => StreamEventKind::Text(text_field(&v, "delta")),
            Some("thinking") => StreamEventKind::Thinking(text_field(&v, "delta")),
            Some("tool_start") => StreamEventKind::ToolStart {
                name: text_field(&v, "name"),
                call_id: text_field(&v, "id"),
                input: v.get("input").and_then(Value::as_object).cloned().unwrap_or_default(),
            },
            Some("tool_result") => StreamEventKind::ToolComplete {
                name: text_field(&v, "name"),
                call_id: text_field(&v, "id"),
                input: v.get("input").and_then(Value::as_object).cloned().unwrap_or_default(),
                result: v.get("result").cloned().unwrap_or(Value::Null),
                is_error: v.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            },
            Some("turn_complete") => StreamEventKind::TurnComplete {
                turn_number: v.get("turn_number").and_then(Value::as_u64).unwrap_or(0),
                // The rpc backend never reports usage/cost (spec §4.1):
                // `success` is the only field this backend actually sends.
                success: v.get("success").and_then(Value::as_bool).unwrap_or(true),
                duration_ms: 0,
                cost_usd: 0.0,
            },
            Some("error") => StreamEventKind::Error {
                error: text_field(&v, "error"),
                context: text_field(&v, "context"),
            },
            _ => StreamEventKind::Unrecognized,
        }
    }
}

fn text_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// The shared subprocess transport. One reader task owns the subprocess's
/// stdout exclusively (spec §5: "consumed by one reader task") and fans
/// every parsed event out to all registered threads via a broadcast channel.
pub struct RpcTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    events: broadcast::Sender<RpcNativeEvent>,
    stop: CancellationToken,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    next_thread: AtomicU64,
}

impl RpcTransport {
    pub async fn spawn(launch: RpcLaunchConfig) -> Result<Arc<Self>> {
        if let Some(dir) = &launch.work_dir
            && !dir.is_dir()
        {
            return Err(Error::InvalidConfig(format!(
                "rpc backend: work_dir does not exist: {}",
                dir.display()
            )));
        }

        let mut cmd = tokio::process::Command::new(&launch.program);
        cmd.args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &launch.work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("rpc backend: failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("rpc backend: failed to capture child stdout".into()))?;
        let stderr = child.stderr.take();

        let (events_tx, _) = broadcast::channel(BROADCAST_DEPTH);
        let stop = CancellationToken::new();

        let reader_tx = events_tx.clone();
        let reader_stop = stop.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    biased;
                    _ = reader_stop.cancelled() => break,
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                let trimmed = line.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<Value>(trimmed) {
                                    Ok(body) => {
                                        let thread_id = body
                                            .get("thread_id")
                                            .and_then(Value::as_str)
                                            .unwrap_or_default()
                                            .to_string();
                                        let _ = reader_tx.send(RpcNativeEvent { thread_id, body });
                                    }
                                    Err(err) => {
                                        tracing::debug!(target: "agmux::subprocess", %err, "skipping unparseable rpc line");
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                tracing::warn!(target: "agmux::subprocess", %err, "rpc stdout read error");
                                break;
                            }
                        }
                    }
                }
            }
        });

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "agmux::subprocess", line = %line, "rpc stderr");
                }
            });
        }

        Ok(Arc::new(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            events: events_tx,
            stop,
            reader: Mutex::new(Some(reader)),
            next_thread: AtomicU64::new(1),
        }))
    }

    fn allocate_thread_id(&self) -> String {
        format!("thread-{}", self.next_thread.fetch_add(1, Ordering::Relaxed))
    }

    async fn write_line(&self, value: &Value) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.stop.cancel();
        {
            let mut child = self.child.lock().await;
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(10), child.wait()).await;
        }
        if let Some(reader) = self.reader.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), reader).await;
        }
        Ok(())
    }
}

struct TurnCollector {
    inner: Option<Arc<dyn EventHandler>>,
    state: std::sync::Mutex<(String, String)>,
    done: std::sync::Mutex<Option<oneshot::Sender<ExecuteResult>>>,
}

impl TurnCollector {
    fn new(inner: Option<Arc<dyn EventHandler>>, done: oneshot::Sender<ExecuteResult>) -> Self {
        Self {
            inner,
            state: std::sync::Mutex::new((String::new(), String::new())),
            done: std::sync::Mutex::new(Some(done)),
        }
    }
}

impl EventHandler for TurnCollector {
    fn handle(&self, event: &AgentEvent) {
        if let Some(inner) = &self.inner {
            inner.handle(event);
        }
        match event {
            AgentEvent::Text { delta } => self.state.lock().unwrap().0.push_str(delta),
            AgentEvent::Thinking { delta } => self.state.lock().unwrap().1.push_str(delta),
            AgentEvent::TurnComplete { success, .. } => {
                let (text, thinking) = self.state.lock().unwrap().clone();
                let result = ExecuteResult {
                    text,
                    thinking,
                    success: *success,
                    error: None,
                    duration_ms: 0,
                    // The rpc backend never reports usage/cost (spec §4.1).
                    usage: Usage::default(),
                };
                if let Some(tx) = self.done.lock().unwrap().take() {
                    let _ = tx.send(result);
                }
            }
            AgentEvent::Error { error, .. } => {
                let (text, thinking) = self.state.lock().unwrap().clone();
                let result = ExecuteResult {
                    text,
                    thinking,
                    success: false,
                    error: Some(error.clone()),
                    duration_ms: 0,
                    usage: Usage::default(),
                };
                if let Some(tx) = self.done.lock().unwrap().take() {
                    let _ = tx.send(result);
                }
            }
            _ => {}
        }
    }
}

/// One scoped thread over a shared `RpcTransport` (spec §4.1
/// `LongRunningProvider`). Multiple `RpcProvider`s may share one transport;
/// each sees only events tagged with its own `thread_id`.
pub struct RpcProvider {
    name: String,
    transport: Arc<RpcTransport>,
    thread_id: String,
    bridge_stop: CancellationToken,
    handler_slot: SharedEventHandler,
    events: RwLock<Option<EventStream>>,
    bridge: Mutex<Option<tokio::task::JoinHandle<()>>>,
    forwarder: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RpcProvider {
    pub fn new(name: impl Into<String>, transport: Arc<RpcTransport>) -> Self {
        let thread_id = transport.allocate_thread_id();
        Self {
            name: name.into(),
            transport,
            thread_id,
            bridge_stop: CancellationToken::new(),
            handler_slot: Arc::new(RwLock::new(None)),
            events: RwLock::new(None),
            bridge: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    /// Spawns the per-thread forwarder (broadcast → scoped mpsc `source`)
    /// and the generic bridge over it. Idempotent.
    async fn ensure_bridge(&self) -> Result<()> {
        if self.bridge.lock().await.is_some() {
            return Ok(());
        }

        let (outbound_tx, fresh_outbound_rx) = mpsc::channel(100);
        *self.events.write().await = Some(EventStream::new(fresh_outbound_rx));

        let (source_tx, source_rx) = mpsc::channel(256);
        let mut broadcast_rx = self.transport.events.subscribe();
        let forwarder_stop = self.bridge_stop.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = forwarder_stop.cancelled() => break,
                    received = broadcast_rx.recv() => {
                        match received {
                            Ok(event) => {
                                if source_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        let bridge = run_bridge(BridgeConfig {
            source: source_rx,
            outbound: outbound_tx,
            scope_id: Some(self.thread_id.clone()),
            event_handler: Some(self.handler_slot.clone()),
            stop: self.bridge_stop.clone(),
            on_turn_complete: None,
        });

        *self.forwarder.lock().await = Some(forwarder);
        *self.bridge.lock().await = Some(bridge);
        Ok(())
    }

    async fn run_turn(
        &self,
        cancel: CancellationToken,
        payload: Value,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<ExecuteResult> {
        self.ensure_bridge().await?;

        let (tx, rx) = oneshot::channel();
        let collector: Arc<dyn EventHandler> = Arc::new(TurnCollector::new(handler, tx));
        *self.handler_slot.write().await = Some(collector);

        let request = json!({
            "thread_id": self.thread_id,
            "type": "request",
            "payload": payload,
        });
        let write_result = self.transport.write_line(&request).await;

        let outcome = if let Err(err) = write_result {
            Err(err)
        } else {
            tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                res = rx => res.map_err(|_| {
                    Error::Transport("rpc thread closed without completion".into())
                }),
            }
        };

        tokio::time::sleep(POST_TURN_DRAIN).await;
        *self.handler_slot.write().await = None;
        outcome
    }
}

#[async_trait]
impl Provider for RpcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        prompt: &str,
        config: ExecuteConfig,
    ) -> Result<ExecuteResult> {
        // The shared transport's subprocess is already running by the time
        // any `execute` call reaches here (spec §9: one transport, many
        // scoped threads) — a per-call `work_dir` can't change its cwd, but
        // spec §4.1 still requires `Execute` to fail on a missing directory
        // rather than silently ignore the option.
        if let Some(dir) = &config.work_dir
            && !dir.is_dir()
        {
            return Err(Error::InvalidConfig(format!(
                "rpc backend: work_dir does not exist: {}",
                dir.display()
            )));
        }
        let payload = json!({"content": prompt, "model": config.model_or_default()});
        self.run_turn(cancel, payload, config.event_handler).await
    }

    fn events(&self) -> EventStream {
        self.events
            .try_read()
            .ok()
            .and_then(|g| g.clone())
            .unwrap_or_else(|| EventStream::new(mpsc::channel(1).1))
    }

    async fn close(&self) -> Result<()> {
        self.bridge_stop.cancel();
        if let Some(handle) = self.bridge.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }
        if let Some(handle) = self.forwarder.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }
        Ok(())
    }
}

#[async_trait]
impl LongRunningProvider for RpcProvider {
    async fn start(&self, _cancel: CancellationToken) -> Result<()> {
        self.ensure_bridge().await
    }

    async fn send_message(&self, cancel: CancellationToken, message: &str) -> Result<ExecuteResult> {
        let payload = json!({"content": message});
        self.run_turn(cancel, payload, None).await
    }

    async fn stop(&self) -> Result<()> {
        self.bridge_stop.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_id_is_the_thread_id() {
        let native = RpcNativeEvent {
            thread_id: "thread-7".to_string(),
            body: json!({"type": "text", "delta": "hi"}),
        };
        assert_eq!(native.scope_id(), Some("thread-7"));
    }

    #[test]
    fn rpc_turn_complete_never_carries_cost() {
        let native = RpcNativeEvent {
            thread_id: "t".into(),
            body: json!({"type": "turn_complete", "success": true, "cost_usd": 5.0}),
        };
        match native.classify() {
            StreamEventKind::TurnComplete { cost_usd, .. } => assert_eq!(cost_usd, 0.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_fails_eagerly_on_missing_work_dir() {
        let launch = RpcLaunchConfig {
            program: "cat".to_string(),
            args: vec![],
            work_dir: Some(std::path::PathBuf::from("/does/not/exist/agmux-rpc-test")),
        };
        let err = RpcTransport::spawn(launch).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn execute_fails_eagerly_on_missing_work_dir() {
        let transport = RpcTransport::spawn(RpcLaunchConfig {
            program: "cat".to_string(),
            args: vec![],
            work_dir: None,
        })
        .await
        .unwrap();
        let provider = RpcProvider::new("rpc-test", transport.clone());
        let config = ExecuteConfig::new().work_dir("/does/not/exist/agmux-rpc-test");
        let err = provider
            .execute(CancellationToken::new(), "ignored", config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        transport.close().await.unwrap();
    }
}
