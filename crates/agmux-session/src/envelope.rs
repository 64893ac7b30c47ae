//! Envelope strippers (spec §4.5): reduce three distinct on-disk/wire shapes
//! down to the single canonical vocabulary `MessageParser::dispatch`
//! consumes -- each source is a line-oriented JSON stream, one line is one
//! enveloped message.

use chrono::{DateTime, Utc};
use serde_json::Value;

use agmux_types::{Error, OutputLine, OutputLineType, Result, SessionId};

use crate::model::SessionModel;
use crate::parser::MessageParser;

/// Live NDJSON: each line is already a bare vocabulary message, no envelope.
pub fn strip_live_line(line: &str) -> Result<Value> {
    serde_json::from_str(line).map_err(|e| Error::Protocol(format!("invalid NDJSON line: {e}")))
}

/// SDK recorder format: `{"timestamp": ..., "direction": ..., "message": {...}}`.
/// Returns the inner message plus the envelope's own timestamp/direction.
pub struct SdkRecorderEnvelope {
    pub message: Value,
    pub timestamp: DateTime<Utc>,
    pub direction: String,
}

pub fn strip_sdk_recorder_line(line: &str) -> Result<SdkRecorderEnvelope> {
    let envelope: Value =
        serde_json::from_str(line).map_err(|e| Error::Protocol(format!("invalid recorder envelope: {e}")))?;
    let message = envelope
        .get("message")
        .cloned()
        .ok_or_else(|| Error::Protocol("recorder envelope missing 'message' field".to_string()))?;
    let timestamp = envelope
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let direction = envelope
        .get("direction")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    Ok(SdkRecorderEnvelope { message, timestamp, direction })
}

/// Outcome of stripping one line of a raw session log (spec §4.5 "raw
/// session log format"): either a bare vocabulary message to hand to the
/// `MessageParser`, a line synthesized directly from an envelope-only type
/// that the parser never sees, or nothing at all.
pub enum RawLineOutcome {
    Message(Value),
    Synthesized(OutputLine),
    Dropped,
}

/// Raw session log format: every line carries an outer `{"type": ..., ...}`
/// envelope. Most types wrap a `"message"` vocabulary entry; some types
/// exist only in this envelope and are synthesized directly into a status
/// or error line (spec §4.5 envelope-only synthesis table); the rest are
/// dropped as noise specific to this recording format.
pub fn strip_raw_line(line: &str) -> Result<RawLineOutcome> {
    let envelope: Value =
        serde_json::from_str(line).map_err(|e| Error::Protocol(format!("invalid raw log line: {e}")))?;
    let envelope_type = envelope.get("type").and_then(Value::as_str).unwrap_or("");
    let subtype = envelope.get("subtype").and_then(Value::as_str).unwrap_or("");

    match envelope_type {
        "assistant" | "user" | "result" | "stream_event" | "control_request" | "control_response" => {
            if let Some(message) = envelope.get("message") {
                Ok(RawLineOutcome::Message(message.clone()))
            } else {
                Ok(RawLineOutcome::Message(envelope))
            }
        }
        // `system` is envelope-only except for `subtype:"init"`, which carries
        // the real vocabulary message the parser's `system(init)` arm wants.
        "system" if subtype == "init" => {
            if let Some(message) = envelope.get("message") {
                Ok(RawLineOutcome::Message(message.clone()))
            } else {
                Ok(RawLineOutcome::Message(envelope))
            }
        }
        "system" => match subtype {
            "api_error" => {
                let detail = format_api_error(&envelope);
                let mut out = OutputLine::new(OutputLineType::Error, detail);
                out.is_error = true;
                Ok(RawLineOutcome::Synthesized(out))
            }
            "turn_duration" => {
                let ms = envelope.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
                let seconds = ms as f64 / 1000.0;
                Ok(RawLineOutcome::Synthesized(OutputLine::new(
                    OutputLineType::Status,
                    format!("Turn duration: {seconds:.1}s"),
                )))
            }
            "compact_boundary" => Ok(RawLineOutcome::Synthesized(OutputLine::new(
                OutputLineType::Status,
                "── Context compacted ──",
            ))),
            "local_command" => {
                let content = envelope.get("content").and_then(Value::as_str).unwrap_or("");
                Ok(RawLineOutcome::Synthesized(OutputLine::new(
                    OutputLineType::Status,
                    format!("/ {content}"),
                )))
            }
            _ => {
                tracing::debug!(target: "agmux::envelope", subtype, "dropping unrecognized system envelope subtype");
                Ok(RawLineOutcome::Dropped)
            }
        },
        "pr-link" => {
            let number = envelope.get("number");
            let number = number.map(value_as_display).unwrap_or_default();
            let url = envelope.get("url").and_then(Value::as_str).unwrap_or("");
            Ok(RawLineOutcome::Synthesized(OutputLine::new(
                OutputLineType::Status,
                format!("PR #{number}: {url}"),
            )))
        }
        "progress" => match subtype {
            "mcp_progress" => {
                let server = envelope.get("server").and_then(Value::as_str).unwrap_or("");
                let tool = envelope.get("tool").and_then(Value::as_str).unwrap_or("");
                match envelope.get("status").and_then(Value::as_str) {
                    Some(status @ "completed") => Ok(RawLineOutcome::Synthesized(OutputLine::new(
                        OutputLineType::Status,
                        format!("MCP {server}/{tool}: {status}"),
                    ))),
                    Some(status @ "failed") => {
                        let mut out =
                            OutputLine::new(OutputLineType::Status, format!("MCP {server}/{tool}: {status}"));
                        out.is_error = true;
                        Ok(RawLineOutcome::Synthesized(out))
                    }
                    _ => Ok(RawLineOutcome::Dropped),
                }
            }
            "waiting_for_task" => {
                let task = envelope.get("task").and_then(Value::as_str).unwrap_or("");
                Ok(RawLineOutcome::Synthesized(OutputLine::new(
                    OutputLineType::Status,
                    format!("Waiting: {task}"),
                )))
            }
            "bash_progress" | "agent_progress" | "hook_progress" => Ok(RawLineOutcome::Dropped),
            _ => {
                tracing::debug!(target: "agmux::envelope", subtype, "dropping unrecognized progress envelope subtype");
                Ok(RawLineOutcome::Dropped)
            }
        },
        "file-history-snapshot" | "queue-operation" => Ok(RawLineOutcome::Dropped),
        _ => {
            tracing::debug!(target: "agmux::envelope", envelope_type, "dropping unrecognized raw log envelope");
            Ok(RawLineOutcome::Dropped)
        }
    }
}

/// Renders a JSON scalar the way a human expects it in a status/error line
/// (a bare string without surrounding quotes, a number without decoration).
fn value_as_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `system.api_error` synthesis (spec §4.5): "a best-effort decoded
/// `code (path)`". The `error` field's shape isn't pinned down by the wire
/// contract, so this degrades gracefully from a `{code, path}` object down
/// to a bare string.
fn format_api_error(envelope: &Value) -> String {
    match envelope.get("error") {
        Some(Value::Object(map)) => {
            let code = map.get("code").map(value_as_display).unwrap_or_else(|| "error".to_string());
            let path = map.get("path").and_then(Value::as_str).unwrap_or("");
            format!("{code} ({path})")
        }
        Some(Value::String(s)) => s.clone(),
        _ => "api error".to_string(),
    }
}

/// Drives a whole raw session log through `strip_raw_line` + `MessageParser`
/// against one `SessionModel`. Captures the outermost `sessionId` seen on
/// any envelope and applies it via `PatchSessionID` once the log is
/// exhausted, since the id may live on the envelope rather than any inner
/// vocabulary message (spec §4.5).
pub struct RawLogLoader {
    parser: MessageParser,
    session_id: Option<SessionId>,
}

impl RawLogLoader {
    pub fn new() -> Self {
        Self {
            parser: MessageParser::new(),
            session_id: None,
        }
    }

    /// Processes one line. Parse errors on a single malformed line are
    /// swallowed (logged) rather than aborting the whole replay — a
    /// corrupt line in a historical log must not block loading the rest.
    pub fn load_line(&mut self, model: &SessionModel, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        if self.session_id.is_none()
            && let Ok(raw) = serde_json::from_str::<Value>(line)
            && let Some(id) = raw.get("sessionId").and_then(Value::as_str)
        {
            self.session_id = Some(SessionId::new(id));
        }

        match strip_raw_line(line) {
            Ok(RawLineOutcome::Message(message)) => self.parser.dispatch(model, &message),
            Ok(RawLineOutcome::Synthesized(out)) => model.append_output(out),
            Ok(RawLineOutcome::Dropped) => {}
            Err(e) => tracing::debug!(target: "agmux::envelope", error = %e, "dropping malformed raw log line"),
        }
    }

    pub fn finish(self, model: &SessionModel) {
        if let Some(id) = self.session_id {
            model.patch_session_id(id);
        }
    }
}

impl Default for RawLogLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmux_types::SessionMeta;

    #[test]
    fn live_line_passes_through_unwrapped() {
        let v = strip_live_line(r#"{"type":"result","is_error":false}"#).unwrap();
        assert_eq!(v["type"], "result");
    }

    #[test]
    fn sdk_recorder_unwraps_message_and_keeps_envelope_fields() {
        let line = r#"{"timestamp":"2024-01-01T00:00:00Z","direction":"from_agent","message":{"type":"result","is_error":false}}"#;
        let env = strip_sdk_recorder_line(line).unwrap();
        assert_eq!(env.message["type"], "result");
        assert_eq!(env.direction, "from_agent");
    }

    #[test]
    fn raw_log_synthesizes_turn_duration_as_status_line() {
        let outcome =
            strip_raw_line(r#"{"type":"system","subtype":"turn_duration","duration_ms":1200}"#).unwrap();
        match outcome {
            RawLineOutcome::Synthesized(line) => {
                assert_eq!(line.line_type, OutputLineType::Status);
                assert_eq!(line.content, "Turn duration: 1.2s");
            }
            _ => panic!("expected synthesized status line"),
        }
    }

    #[test]
    fn raw_log_drops_bash_progress_noise() {
        let outcome = strip_raw_line(r#"{"type":"progress","subtype":"bash_progress","chunk":"..."}"#).unwrap();
        assert!(matches!(outcome, RawLineOutcome::Dropped));
    }

    #[test]
    fn raw_log_synthesizes_compact_boundary() {
        let outcome = strip_raw_line(r#"{"type":"system","subtype":"compact_boundary"}"#).unwrap();
        match outcome {
            RawLineOutcome::Synthesized(line) => {
                assert_eq!(line.content, "── Context compacted ──");
            }
            _ => panic!("expected synthesized status line"),
        }
    }

    #[test]
    fn raw_log_synthesizes_local_command() {
        let outcome =
            strip_raw_line(r#"{"type":"system","subtype":"local_command","content":"clear"}"#).unwrap();
        match outcome {
            RawLineOutcome::Synthesized(line) => assert_eq!(line.content, "/ clear"),
            _ => panic!("expected synthesized status line"),
        }
    }

    #[test]
    fn raw_log_synthesizes_pr_link() {
        let outcome =
            strip_raw_line(r#"{"type":"pr-link","number":42,"url":"https://example.com/pr/42"}"#).unwrap();
        match outcome {
            RawLineOutcome::Synthesized(line) => {
                assert_eq!(line.content, "PR #42: https://example.com/pr/42");
            }
            _ => panic!("expected synthesized status line"),
        }
    }

    #[test]
    fn raw_log_synthesizes_mcp_progress_completed() {
        let outcome = strip_raw_line(
            r#"{"type":"progress","subtype":"mcp_progress","server":"fs","tool":"read","status":"completed"}"#,
        )
        .unwrap();
        match outcome {
            RawLineOutcome::Synthesized(line) => assert_eq!(line.content, "MCP fs/read: completed"),
            _ => panic!("expected synthesized status line"),
        }
    }

    #[test]
    fn raw_log_drops_mcp_progress_in_other_states() {
        let outcome = strip_raw_line(
            r#"{"type":"progress","subtype":"mcp_progress","server":"fs","tool":"read","status":"running"}"#,
        )
        .unwrap();
        assert!(matches!(outcome, RawLineOutcome::Dropped));
    }

    #[test]
    fn raw_log_synthesizes_waiting_for_task() {
        let outcome =
            strip_raw_line(r#"{"type":"progress","subtype":"waiting_for_task","task":"run tests"}"#).unwrap();
        match outcome {
            RawLineOutcome::Synthesized(line) => assert_eq!(line.content, "Waiting: run tests"),
            _ => panic!("expected synthesized status line"),
        }
    }

    #[test]
    fn raw_log_synthesizes_api_error_with_code_and_path() {
        let outcome = strip_raw_line(
            r#"{"type":"system","subtype":"api_error","error":{"code":"E_TIMEOUT","path":"/v1/complete"}}"#,
        )
        .unwrap();
        match outcome {
            RawLineOutcome::Synthesized(line) => {
                assert_eq!(line.line_type, OutputLineType::Error);
                assert!(line.is_error);
                assert_eq!(line.content, "E_TIMEOUT (/v1/complete)");
            }
            _ => panic!("expected synthesized error line"),
        }
    }

    #[test]
    fn raw_log_drops_non_init_system_subtype_not_in_synthesis_table() {
        let outcome = strip_raw_line(r#"{"type":"system","subtype":"debug_ping"}"#).unwrap();
        assert!(matches!(outcome, RawLineOutcome::Dropped));
    }

    #[test]
    fn raw_log_loader_patches_session_id_from_outermost_envelope_once() {
        let model = SessionModel::new(SessionMeta::new("sonnet", "/tmp"), 1000);
        let mut loader = RawLogLoader::new();
        loader.load_line(&model, r#"{"type":"system","subtype":"init","sessionId":"sess-abc","message":{"type":"system","subtype":"init","model":"sonnet","cwd":"/tmp"}}"#);
        loader.load_line(&model, r#"{"type":"result","sessionId":"sess-ignored-later","message":{"type":"result","is_error":false}}"#);
        loader.finish(&model);

        assert_eq!(model.meta().session_id.as_str(), "sess-abc");
    }

    #[test]
    fn raw_log_loader_tolerates_malformed_line() {
        let model = SessionModel::new(SessionMeta::new("sonnet", "/tmp"), 1000);
        let mut loader = RawLogLoader::new();
        loader.load_line(&model, "not json at all {{{");
        loader.load_line(&model, r#"{"type":"result","message":{"type":"result","is_error":false}}"#);
        assert_eq!(model.meta().status, agmux_types::SessionStatus::Completed);
    }
}
