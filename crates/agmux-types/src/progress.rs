use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutex-free value carrying a session's current progress. Cloned out of the
/// `SessionModel` for observers rather than shared by reference (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Free-form phase label: `"tool_execution"`, `"thinking"`, or `""`.
    #[serde(default)]
    pub current_phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,
    #[serde(default)]
    pub turn_count: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default = "Utc::now")]
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub status_line: String,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            current_phase: String::new(),
            current_tool: None,
            turn_count: 0,
            total_cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            last_activity: Utc::now(),
            status_line: String::new(),
        }
    }
}

impl ProgressSnapshot {
    /// Clears `current_tool`/`current_phase`; called when a `tool_result`
    /// arrives (spec §4.5.1).
    pub fn clear_current_tool(&mut self) {
        self.current_tool = None;
        self.current_phase.clear();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
