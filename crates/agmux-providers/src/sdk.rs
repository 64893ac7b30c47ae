//! `sdk` backend: a long-running subprocess that reads one JSON request per
//! line on stdin and writes one streaming-vocabulary JSON object per line on
//! stdout (spec §4.1 "line-delimited-JSON SDK", §4.5 "Live NDJSON"). The
//! child is spawned lazily on first use and kept alive across turns; a
//! dedicated reader task owns stdout and feeds the generic event bridge
//! (see `DESIGN.md`).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use agmux_types::Usage;

use crate::bridge::{run_bridge, BridgeConfig, SharedEventHandler};
use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::event::{AgentEvent, NativeEvent, StreamEventKind};
use crate::traits::{
    EventHandler, EventStream, ExecuteConfig, ExecuteResult, LongRunningProvider, Provider,
};

/// Grace period after a turn's terminal event during which the per-call
/// handler stays installed, to catch events emitted between the
/// subprocess's own "turn complete" and our observation of it (spec §4.3).
const POST_TURN_DRAIN: Duration = Duration::from_millis(100);

/// How the `sdk` backend is launched.
#[derive(Debug, Clone)]
pub struct SdkLaunchConfig {
    pub program: String,
    pub args: Vec<String>,
}

/// One line of the sdk backend's streaming vocabulary. The wire format here
/// is intentionally simple (already canonical-shaped) — spec §1 treats each
/// backend's wire protocol as an opaque black box, and the richer
/// stream_event/content_block accumulation in spec §4.5.1 belongs to the
/// Session Model's envelope strippers operating on a recorded transcript,
/// not to this bridge-facing layer.
struct SdkNativeEvent(Value);

impl NativeEvent for SdkNativeEvent {
    fn classify(self) -> StreamEventKind {
        let v = self.0;
        match v.get("type").and_then(Value::as_str) {
            Some("text") => StreamEventKind::Text(text_field(&v, "delta")),
            Some("thinking") => StreamEventKind::Thinking(text_field(&v, "delta")),
            Some("tool_start") => StreamEventKind::ToolStart {
                name: text_field(&v, "name"),
                call_id: text_field(&v, "id"),
                input: v
                    .get("input")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            Some("tool_result") => StreamEventKind::ToolComplete {
                name: text_field(&v, "name"),
                call_id: text_field(&v, "id"),
                input: v
                    .get("input")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                result: v.get("result").cloned().unwrap_or(Value::Null),
                is_error: v.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            },
            Some("turn_complete") => StreamEventKind::TurnComplete {
                turn_number: v.get("turn_number").and_then(Value::as_u64).unwrap_or(0),
                success: v.get("success").and_then(Value::as_bool).unwrap_or(true),
                duration_ms: v.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
                cost_usd: v.get("cost_usd").and_then(Value::as_f64).unwrap_or(0.0),
            },
            Some("error") => StreamEventKind::Error {
                error: text_field(&v, "error"),
                context: text_field(&v, "context"),
            },
            // "system" (init/meta) and anything unrecognized carry no
            // canonical capability: absorbed silently (spec §4.2 step 3).
            _ => StreamEventKind::Unrecognized,
        }
    }
}

fn text_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Accumulates one in-flight turn's text/thinking and resolves a oneshot
/// once a terminal event (`TurnComplete` or `Error`) arrives. Wraps the
/// caller's own `EventHandler`, if any, so both see every event (spec §4.3).
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
            AgentEvent::TurnComplete {
                success,
                duration_ms,
                cost_usd,
                ..
            } => {
                let (text, thinking) = self.state.lock().unwrap().clone();
                let result = ExecuteResult {
                    text,
                    thinking,
                    success: *success,
                    error: None,
                    duration_ms: *duration_ms,
                    usage: Usage {
                        cost_usd: *cost_usd,
                        ..Default::default()
                    },
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

struct Session {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stop: CancellationToken,
    bridge: tokio::task::JoinHandle<()>,
    reader: tokio::task::JoinHandle<()>,
    handler_slot: SharedEventHandler,
    events: EventStream,
}

/// The `sdk` backend (spec §4.1 `LongRunningProvider`). Lazily spawns its
/// subprocess on first use, guarded by `spawn_lock`; the subprocess outlives
/// any single request's cancellation (spec §4.3 "Lazy init").
pub struct SdkProvider {
    name: String,
    launch: SdkLaunchConfig,
    spawn_lock: Mutex<()>,
    session: RwLock<Option<Arc<Session>>>,
}

impl SdkProvider {
    pub fn new(name: impl Into<String>, launch: SdkLaunchConfig) -> Self {
        Self {
            name: name.into(),
            launch,
            spawn_lock: Mutex::new(()),
            session: RwLock::new(None),
        }
    }

    async fn ensure_session(&self, work_dir: Option<&std::path::Path>) -> Result<Arc<Session>> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        let _guard = self.spawn_lock.lock().await;
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        let session = Arc::new(self.spawn(work_dir).await?);
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn spawn(&self, work_dir: Option<&std::path::Path>) -> Result<Session> {
        if let Some(dir) = work_dir
            && !dir.is_dir()
        {
            return Err(Error::InvalidConfig(format!(
                "sdk backend: work_dir does not exist: {}",
                dir.display()
            )));
        }

        let mut cmd = tokio::process::Command::new(&self.launch.program);
        cmd.args(&self.launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            Error::Transport("sdk backend: failed to capture child stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Transport("sdk backend: failed to capture child stdout".into())
        })?;
        let stderr = child.stderr.take();

        let (native_tx, native_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let stop = CancellationToken::new();
        let handler_slot: SharedEventHandler = Arc::new(RwLock::new(None));

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
                                    Ok(value) => {
                                        if native_tx.send(SdkNativeEvent(value)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        tracing::debug!(target: "agmux::subprocess", %err, "skipping unparseable sdk line");
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                tracing::warn!(target: "agmux::subprocess", %err, "sdk stdout read error");
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
                    tracing::warn!(target: "agmux::subprocess", line = %line, "sdk stderr");
                }
            });
        }

        let bridge = run_bridge(BridgeConfig {
            source: native_rx,
            outbound: outbound_tx,
            scope_id: None,
            event_handler: Some(handler_slot.clone()),
            stop: stop.clone(),
            on_turn_complete: None,
        });

        Ok(Session {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stop,
            bridge,
            reader,
            handler_slot,
            events: EventStream::new(outbound_rx),
        })
    }

    async fn write_request(&self, session: &Session, value: &Value) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut stdin = session.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn run_turn(
        &self,
        cancel: CancellationToken,
        session: &Arc<Session>,
        request: Value,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<ExecuteResult> {
        let (tx, rx) = oneshot::channel();
        let collector: Arc<dyn EventHandler> = Arc::new(TurnCollector::new(handler, tx));
        *session.handler_slot.write().await = Some(collector);

        let write_result = self.write_request(session, &request).await;

        let outcome = if let Err(err) = write_result {
            Err(err)
        } else {
            tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                res = rx => res.map_err(|_| {
                    Error::Transport("sdk session closed without completion".into())
                }),
            }
        };

        tokio::time::sleep(POST_TURN_DRAIN).await;
        *session.handler_slot.write().await = None;
        outcome
    }
}

#[async_trait]
impl Provider for SdkProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        prompt: &str,
        config: ExecuteConfig,
    ) -> Result<ExecuteResult> {
        let session = self.ensure_session(config.work_dir.as_deref()).await?;
        let request = json!({
            "type": "user",
            "content": prompt,
            "model": config.model_or_default(),
            "permission_mode": config.permission_mode.as_str(),
        });
        self.run_turn(cancel, &session, request, config.event_handler)
            .await
    }

    fn events(&self) -> EventStream {
        // Safe to call before a session exists only after `start`/`execute`;
        // callers that race this are a programming error, not a data race.
        self.session
            .try_read()
            .ok()
            .and_then(|g| g.as_ref().map(|s| s.events.clone()))
            .unwrap_or_else(|| EventStream::new(mpsc::channel(1).1))
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.write().await.take();
        let Some(session) = session else {
            return Ok(());
        };
        session.stop.cancel();
        {
            let mut child = session.child.lock().await;
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(10), child.wait()).await;
        }
        let _ = tokio::time::timeout(Duration::from_secs(10), session.reader).await;
        let _ = tokio::time::timeout(Duration::from_secs(10), session.bridge).await;
        Ok(())
    }
}

#[async_trait]
impl LongRunningProvider for SdkProvider {
    async fn start(&self, _cancel: CancellationToken) -> Result<()> {
        self.ensure_session(None).await?;
        Ok(())
    }

    async fn send_message(&self, cancel: CancellationToken, message: &str) -> Result<ExecuteResult> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Transport("sdk backend: send_message before start".into()))?;
        let request = json!({"type": "user", "content": message});
        self.run_turn(cancel, &session, request, None).await
    }

    async fn stop(&self) -> Result<()> {
        if let Some(session) = self.session.read().await.as_ref() {
            session.stop.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_text_delta() {
        let native = SdkNativeEvent(json!({"type": "text", "delta": "hello"}));
        match native.classify() {
            StreamEventKind::Text(s) => assert_eq!(s, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classifies_unknown_type_as_unrecognized() {
        let native = SdkNativeEvent(json!({"type": "system", "subtype": "init"}));
        assert!(matches!(native.classify(), StreamEventKind::Unrecognized));
    }

    #[tokio::test]
    async fn spawns_echo_style_subprocess_and_streams_events() {
        // `cat` echoes stdin to stdout unchanged, which is enough to drive
        // the reader/bridge plumbing without depending on a real backend.
        let provider = SdkProvider::new(
            "sdk-test",
            SdkLaunchConfig {
                program: "cat".to_string(),
                args: vec![],
            },
        );

        // `cat` never emits a JSON turn_complete line, so the call never
        // resolves on its own; bound it externally and assert it didn't
        // panic or deadlock the reader/bridge plumbing.
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            provider.execute(CancellationToken::new(), "ignored", ExecuteConfig::new()),
        )
        .await;
        assert!(result.is_err(), "expected no turn_complete from `cat`");
        provider.close().await.unwrap();
    }

    #[tokio::test]
    async fn execute_fails_eagerly_on_missing_work_dir() {
        let provider = SdkProvider::new(
            "sdk-test",
            SdkLaunchConfig {
                program: "cat".to_string(),
                args: vec![],
            },
        );
        let config = ExecuteConfig::new().work_dir("/does/not/exist/agmux-sdk-test");
        let err = provider
            .execute(CancellationToken::new(), "ignored", config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
