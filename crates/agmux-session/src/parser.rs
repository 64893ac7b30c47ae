//! `MessageParser`: per-message dispatch plus the streaming content-block
//! accumulator (spec §4.5.1). Consumes the single canonical vocabulary that
//! all three envelope strippers reduce their input to, and drives a
//! `SessionModel` via its write API.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};

use agmux_types::{OutputLine, OutputLineType, SessionId, SessionMeta, SessionStatus, ToolCallId};

use crate::model::SessionModel;
use crate::tool_format::format_tool_content;

#[derive(Debug, Clone)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse {
        id: String,
        name: String,
        partial_json: String,
    },
    Other,
}

#[derive(Default)]
struct Accumulator {
    blocks: HashMap<u64, BlockKind>,
}

impl Accumulator {
    fn reset(&mut self) {
        self.blocks.clear();
    }
}

/// Holds the stream accumulator across calls. One `MessageParser` per live
/// session/log replay — it is not `Sync`-shared across sessions.
pub struct MessageParser {
    accumulator: Mutex<Accumulator>,
}

impl MessageParser {
    pub fn new() -> Self {
        Self {
            accumulator: Mutex::new(Accumulator::default()),
        }
    }

    /// Dispatches one vocabulary message against `model` (spec §4.5.1).
    /// Unrecognized `type`s are dropped silently — the Model layer never
    /// fails (spec §7 propagation policy).
    pub fn dispatch(&self, model: &SessionModel, message: &Value) {
        match message.get("type").and_then(Value::as_str) {
            Some("system") => self.handle_system(model, message),
            Some("assistant") => self.handle_assistant(model, message),
            Some("user") => self.handle_user(model, message),
            Some("result") => self.handle_result(model, message),
            Some("stream_event") => self.handle_stream_event(model, message),
            Some("control_request") | Some("control_response") => {}
            _ => {
                tracing::debug!(target: "agmux::parser", "dropping unrecognized message type");
            }
        }
    }

    fn handle_system(&self, model: &SessionModel, message: &Value) {
        if message.get("subtype").and_then(Value::as_str) != Some("init") {
            return;
        }
        let prev = model.meta();
        let session_id = message
            .get("session_id")
            .and_then(Value::as_str)
            .map(SessionId::new)
            .unwrap_or(prev.session_id);
        let model_name = string_field(message, "model").unwrap_or(prev.model);
        let cwd = string_field(message, "cwd").unwrap_or(prev.cwd);
        let permission_mode = string_field(message, "permission_mode").unwrap_or(prev.permission_mode);
        let tools = string_array_field(message, "tools").unwrap_or(prev.tools);
        let agents = string_array_field(message, "agents").unwrap_or(prev.agents);
        let skills = string_array_field(message, "skills").unwrap_or(prev.skills);

        model.set_meta(SessionMeta {
            session_id,
            model: model_name,
            cwd,
            permission_mode,
            tools,
            agents,
            skills,
            status: SessionStatus::Running,
        });
    }

    fn handle_assistant(&self, model: &SessionModel, message: &Value) {
        let inner = message.get("message").unwrap_or(message);
        match inner.get("content") {
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    self.append_static_block(model, block);
                }
            }
            Some(Value::String(text)) => {
                model.append_output(OutputLine::text(text.clone()));
            }
            _ => {}
        }
    }

    fn append_static_block(&self, model: &SessionModel, block: &Value) {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = string_field(block, "text").unwrap_or_default();
                model.append_output(OutputLine::text(text));
            }
            Some("thinking") => {
                let thinking = string_field(block, "thinking").unwrap_or_default();
                model.append_output(OutputLine::thinking(thinking));
            }
            Some("tool_use") => {
                let id = string_field(block, "id").unwrap_or_default();
                let name = string_field(block, "name").unwrap_or_default();
                let input = block.get("input").and_then(Value::as_object).cloned().unwrap_or_default();
                let content = format_tool_content(&name, &input);
                model.append_output(OutputLine::tool_start(
                    ToolCallId::new(id),
                    name,
                    content,
                    Some(input),
                ));
            }
            _ => {}
        }
    }

    fn handle_user(&self, model: &SessionModel, message: &Value) {
        let inner = message.get("message").unwrap_or(message);
        match inner.get("content") {
            Some(Value::String(text)) => {
                let mut line = OutputLine::text(text.clone());
                line.is_user_prompt = true;
                model.append_output(line);
            }
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("tool_result") {
                        self.apply_tool_result(model, block);
                    }
                }
            }
            _ => {}
        }
    }

    fn apply_tool_result(&self, model: &SessionModel, block: &Value) {
        let Some(tool_use_id) = string_field(block, "tool_use_id") else {
            return;
        };
        let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
        let result = block.get("content").cloned().unwrap_or(Value::Null);
        let tool_id = ToolCallId::new(tool_use_id);

        // spec §9 open question: a `tool_result` with no matching
        // `tool_start` in the buffer is dropped silently, observable only
        // via this breadcrumb — left as-is deliberately, not "fixed".
        let mut found = false;
        model.update_tool(&tool_id, |line| {
            found = true;
            line.tool_result = Some(result);
            line.is_error = is_error;
            line.tool_state = Some(if is_error {
                agmux_types::ToolState::Error
            } else {
                agmux_types::ToolState::Complete
            });
            if let Some(start) = line.start_time {
                line.duration_ms = Some((Utc::now() - start).num_milliseconds().max(0) as u64);
            }
        });
        if !found {
            tracing::debug!(target: "agmux::parser", tool_id = %tool_id, "tool_result with no matching tool_start, dropping");
            return;
        }
        model.update_progress(|p| p.clear_current_tool());
    }

    fn handle_result(&self, model: &SessionModel, message: &Value) {
        let is_error = message.get("is_error").and_then(Value::as_bool).unwrap_or(false);
        let cost_usd = message.get("cost_usd").and_then(Value::as_f64).unwrap_or(0.0);
        let input_tokens = message.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let output_tokens = message.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        let cache_read_tokens = message.get("cache_read_tokens").and_then(Value::as_u64).unwrap_or(0);

        model.update_progress(|p| {
            p.turn_count += 1;
            p.total_cost_usd += cost_usd;
            p.input_tokens += input_tokens;
            p.output_tokens += output_tokens;
            p.cache_read_tokens += cache_read_tokens;
            p.touch();
        });

        let mut line = OutputLine::new(OutputLineType::TurnEnd, "");
        line.is_error = is_error;
        line.turn_number = message.get("turn_number").and_then(Value::as_u64);
        line.cost_usd = Some(cost_usd);
        model.append_output(line);

        // A prior terminal transition is the only expected failure here;
        // it is already absurd in this path, so we don't propagate it
        // (spec §4.5.1 "result").
        let _ = model.update_status(if is_error {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        });
    }

    fn handle_stream_event(&self, model: &SessionModel, message: &Value) {
        let Some(event) = message.get("event") else {
            return;
        };
        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => self.accumulator.lock().unwrap().reset(),
            Some("content_block_start") => self.handle_block_start(model, event),
            Some("content_block_delta") => self.handle_block_delta(model, event),
            Some("content_block_stop") => self.handle_block_stop(model, event),
            Some("message_stop") => self.accumulator.lock().unwrap().reset(),
            _ => {}
        }
    }

    fn handle_block_start(&self, model: &SessionModel, event: &Value) {
        let Some(index) = event.get("index").and_then(Value::as_u64) else {
            return;
        };
        let Some(block) = event.get("content_block") else {
            return;
        };
        let kind = match block.get("type").and_then(Value::as_str) {
            Some("text") => BlockKind::Text,
            Some("thinking") => BlockKind::Thinking,
            Some("tool_use") => {
                let id = string_field(block, "id").unwrap_or_default();
                let name = string_field(block, "name").unwrap_or_default();

                let content = format_tool_content(&name, &Map::new());
                model.append_output(OutputLine::tool_start(
                    ToolCallId::new(id.clone()),
                    name.clone(),
                    content,
                    None,
                ));
                model.update_progress(|p| {
                    p.current_tool = Some(name.clone());
                    p.current_phase = "tool_execution".to_string();
                });

                BlockKind::ToolUse {
                    id,
                    name,
                    partial_json: String::new(),
                }
            }
            _ => BlockKind::Other,
        };
        self.accumulator.lock().unwrap().blocks.insert(index, kind);
    }

    fn handle_block_delta(&self, model: &SessionModel, event: &Value) {
        let Some(index) = event.get("index").and_then(Value::as_u64) else {
            return;
        };
        let Some(delta) = event.get("delta") else {
            return;
        };
        let delta_type = delta.get("type").and_then(Value::as_str);

        match delta_type {
            Some("text_delta") => {
                let text = string_field(delta, "text").unwrap_or_default();
                model.append_streaming_text(&text);
            }
            Some("thinking_delta") => {
                let thinking = string_field(delta, "thinking").unwrap_or_default();
                model.append_streaming_thinking(&thinking);
            }
            Some("input_json_delta") => {
                let partial = string_field(delta, "partial_json").unwrap_or_default();
                let mut acc = self.accumulator.lock().unwrap();
                if let Some(BlockKind::ToolUse { partial_json, .. }) = acc.blocks.get_mut(&index) {
                    partial_json.push_str(&partial);
                }
            }
            _ => {}
        }
    }

    fn handle_block_stop(&self, model: &SessionModel, event: &Value) {
        let Some(index) = event.get("index").and_then(Value::as_u64) else {
            return;
        };
        let mut acc = self.accumulator.lock().unwrap();
        let Some(BlockKind::ToolUse { id, name, partial_json }) = acc.blocks.get(&index).cloned() else {
            return;
        };
        drop(acc);

        let input: Map<String, Value> = serde_json::from_str(&partial_json).unwrap_or_default();
        let content = format_tool_content(&name, &input);
        let tool_id = ToolCallId::new(id);
        // Crucially, current_tool/current_phase are NOT cleared here —
        // that happens only when the matching tool_result arrives
        // (spec §4.5.1).
        model.update_tool(&tool_id, |line| {
            line.tool_input = Some(input);
            line.content = content;
        });
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

fn string_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_array_field(v: &Value, key: &str) -> Option<Vec<String>> {
    v.get(key)?.as_array().map(|arr| {
        arr.iter().filter_map(|item| item.as_str().map(str::to_string)).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmux_types::SessionMeta;
    use serde_json::json;

    fn model() -> SessionModel {
        SessionModel::new(SessionMeta::new("sonnet", "/tmp"), 1000)
    }

    #[test]
    fn streaming_text_merge_across_three_deltas() {
        let m = model();
        let parser = MessageParser::new();
        for text in ["Hello", " ", "world"] {
            parser.dispatch(
                &m,
                &json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}}),
            );
        }
        let out = m.output();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "Hello world");
    }

    #[test]
    fn tool_lifecycle_start_input_then_result() {
        let m = model();
        let parser = MessageParser::new();
        parser.dispatch(
            &m,
            &json!({"type": "stream_event", "event": {"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "t1", "name": "Read"}}}),
        );
        parser.dispatch(
            &m,
            &json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"file_path\":\"/foo.go\"}"}}}),
        );
        parser.dispatch(
            &m,
            &json!({"type": "stream_event", "event": {"type": "content_block_stop", "index": 0}}),
        );
        parser.dispatch(
            &m,
            &json!({"type": "user", "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": {"ok": true}, "is_error": false}]}}),
        );

        let out = m.output();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tool_id.as_ref().unwrap().as_str(), "t1");
        assert_eq!(out[0].content, "Read /foo.go");
        assert_eq!(out[0].tool_state, Some(agmux_types::ToolState::Complete));
        assert!(out[0].tool_result.is_some());
        assert!(m.progress().current_tool.is_none());
    }

    #[test]
    fn result_message_sets_terminal_status() {
        let m = model();
        let parser = MessageParser::new();
        parser.dispatch(&m, &json!({"type": "result", "is_error": false, "cost_usd": 0.02}));
        assert_eq!(m.meta().status, SessionStatus::Completed);
        assert_eq!(m.progress().turn_count, 1);
    }

    #[test]
    fn tool_result_without_matching_start_is_dropped_silently() {
        let m = model();
        let parser = MessageParser::new();
        parser.dispatch(
            &m,
            &json!({"type": "user", "message": {"content": [{"type": "tool_result", "tool_use_id": "ghost", "content": {}, "is_error": false}]}}),
        );
        assert!(m.output().is_empty());
    }
}
