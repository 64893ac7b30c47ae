//! `oneshot` backend: spawns a fresh subprocess per `Execute` call, writes a
//! single JSON request to stdin, reads exactly one JSON response object from
//! stdout, and exits (spec §4.1 "one-shot JSON-over-stdio CLI").
//!
//! `Events()` always returns an already-closed channel — this backend
//! cannot stream (spec §4.1). It is also the one backend spec §9 documents
//! as tolerating an invalid work directory silently, where the `sdk` and
//! `rpc` backends fail early; that leniency is implemented here deliberately
//! (see `DESIGN.md`), not treated as a bug to "fix".

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use agmux_types::Usage;

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};
use crate::traits::{EventStream, ExecuteConfig, ExecuteResult, Provider};

/// Bound on how long one round trip (spawn + write + read-one-response) may
/// take before it's treated as a hang.
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct OneshotLaunchConfig {
    pub program: String,
    pub args: Vec<String>,
}

pub struct OneshotProvider {
    name: String,
    launch: OneshotLaunchConfig,
}

impl OneshotProvider {
    pub fn new(name: impl Into<String>, launch: OneshotLaunchConfig) -> Self {
        Self {
            name: name.into(),
            launch,
        }
    }

    async fn call(&self, prompt: &str, config: &ExecuteConfig) -> Result<ExecuteResult> {
        // The `sdk` and `rpc` backends fail `Execute` eagerly if `work_dir`
        // is missing (spec §4.1). This backend is the documented exception:
        // a missing directory is passed straight to the subprocess, which
        // may itself fail (surfaced as a normal transport error) or may
        // tolerate it, matching observed compatibility behavior.
        let mut cmd = tokio::process::Command::new(&self.launch.program);
        cmd.args(&self.launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("oneshot backend: failed to capture stdin".into()))?;

        let request = json!({
            "prompt": prompt,
            "model": config.model_or_default(),
            "system_prompt": config.system_prompt,
            "permission_mode": config.permission_mode.as_str(),
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        drop(stdin);

        let output = tokio::time::timeout(CALL_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::Transport("oneshot backend: call timed out".into()))??;

        if !output.stdout.is_empty() {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                    return Ok(response_to_result(&value));
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Transport(format!(
                "oneshot backend exited with {status}: {stderr}",
                status = output.status,
            )));
        }

        Err(Error::Transport(
            "oneshot backend: no JSON response on stdout".into(),
        ))
    }
}

fn response_to_result(v: &Value) -> ExecuteResult {
    let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    ExecuteResult {
        text: v.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        thinking: v
            .get("thinking")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        success: !is_error,
        error: v.get("error").and_then(Value::as_str).map(str::to_string),
        duration_ms: v.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
        usage: Usage {
            input_tokens: v.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: v.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            cache_read_tokens: v.get("cache_read_tokens").and_then(Value::as_u64).unwrap_or(0),
            cost_usd: v.get("cost_usd").and_then(Value::as_f64).unwrap_or(0.0),
        },
    }
}

#[async_trait]
impl Provider for OneshotProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        prompt: &str,
        config: ExecuteConfig,
    ) -> Result<ExecuteResult> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.call(prompt, &config) => result,
        }
    }

    fn events(&self) -> EventStream {
        // Always-closed: drop the sender immediately so `recv()` returns
        // `None` right away — this backend never streams (spec §4.1).
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        EventStream::new(rx)
    }

    async fn close(&self) -> Result<()> {
        // Nothing persists between calls: each `execute` owns its own
        // subprocess end-to-end and has already reaped it by the time it
        // returns.
        Ok(())
    }
}
