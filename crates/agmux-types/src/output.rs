use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ToolCallId;

/// Discriminant for one transcript entry (spec §3 `OutputLine`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLineType {
    Text,
    Thinking,
    ToolStart,
    ToolResult,
    Error,
    Status,
    TurnEnd,
    PlanReady,
}

impl OutputLineType {
    pub fn is_text(&self) -> bool {
        matches!(self, OutputLineType::Text)
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, OutputLineType::Thinking)
    }
}

/// Lifecycle state of one tool invocation, tracked on its `tool_start` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Running,
    Complete,
    Error,
}

/// One transcript entry. See spec §3 for the field-level invariants:
/// - a `tool_result` line never appears without a preceding `tool_start`
///   carrying the same `tool_id` already in the buffer (it updates that
///   line in place instead, see `OutputBuffer::update_tool_by_id`);
/// - adjacent streaming `text` (or `thinking`) lines are merged by the
///   buffer, never represented as two lines;
/// - `duration_ms` on a `tool_start` line is only set once a matching
///   result arrives and `start_time` was non-zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub line_type: OutputLineType,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<ToolCallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_state: Option<ToolState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_user_prompt: bool,
}

impl OutputLine {
    /// Construct a minimal text/thinking line; most other fields stay `None`.
    pub fn new(line_type: OutputLineType, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            line_type,
            content: content.into(),
            tool_name: None,
            tool_id: None,
            tool_input: None,
            tool_result: None,
            tool_state: None,
            start_time: None,
            duration_ms: None,
            turn_number: None,
            cost_usd: None,
            is_error: false,
            is_user_prompt: false,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(OutputLineType::Text, content)
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::new(OutputLineType::Thinking, content)
    }

    pub fn tool_start(
        tool_id: ToolCallId,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        tool_input: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            tool_id: Some(tool_id),
            tool_name: Some(tool_name.into()),
            tool_input,
            tool_state: Some(ToolState::Running),
            start_time: Some(Utc::now()),
            ..Self::new(OutputLineType::ToolStart, content)
        }
    }

    pub fn is_streamable_text_like(&self) -> bool {
        matches!(self.line_type, OutputLineType::Text | OutputLineType::Thinking)
    }

    /// Deep-copies the map-typed fields so a snapshot handed to an observer
    /// cannot be mutated back into the buffer (spec §8 deep-copy property).
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }
}

/// Normalized usage/cost accounting for one turn or one `Execute` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_clone_does_not_alias_tool_input() {
        let mut map = Map::new();
        map.insert("file_path".into(), Value::String("/foo.go".into()));
        let line = OutputLine::tool_start(ToolCallId::new("t1"), "Read", "Read /foo.go", Some(map));

        let mut snapshot = line.deep_clone();
        if let Some(input) = snapshot.tool_input.as_mut() {
            input.insert("mutated".into(), Value::Bool(true));
        }

        assert!(line.tool_input.as_ref().unwrap().get("mutated").is_none());
    }
}
