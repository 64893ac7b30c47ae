use serde_json::{Map, Value};

/// The six canonical events every backend is normalized down to (spec §4.2).
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Text { delta: String },
    Thinking { delta: String },
    ToolStart {
        name: String,
        call_id: String,
        input: Map<String, Value>,
    },
    ToolComplete {
        name: String,
        call_id: String,
        input: Map<String, Value>,
        result: Value,
        is_error: bool,
    },
    TurnComplete {
        turn_number: u64,
        success: bool,
        duration_ms: u64,
        cost_usd: f64,
    },
    Error { error: String, context: String },
}

/// Capability-tagged classification of one native (backend-specific) event,
/// consumed by the generic bridge (spec §4.2, §9 "dynamic dispatch over
/// heterogeneous events"). A native event type implements `NativeEvent` once;
/// the bridge converts via `classify()` without knowing the backend's wire
/// format.
#[derive(Debug)]
pub enum StreamEventKind {
    Text(String),
    Thinking(String),
    ToolStart {
        name: String,
        call_id: String,
        input: Map<String, Value>,
    },
    ToolComplete {
        name: String,
        call_id: String,
        input: Map<String, Value>,
        result: Value,
        is_error: bool,
    },
    TurnComplete {
        turn_number: u64,
        success: bool,
        duration_ms: u64,
        cost_usd: f64,
    },
    Error { error: String, context: String },
    /// Native event carries no canonical capability tag; dropped by the
    /// bridge (this is how e.g. heartbeat/keepalive frames are absorbed).
    Unrecognized,
}

impl From<StreamEventKind> for Option<AgentEvent> {
    fn from(kind: StreamEventKind) -> Self {
        match kind {
            StreamEventKind::Text(delta) => Some(AgentEvent::Text { delta }),
            StreamEventKind::Thinking(delta) => Some(AgentEvent::Thinking { delta }),
            StreamEventKind::ToolStart { name, call_id, input } => {
                Some(AgentEvent::ToolStart { name, call_id, input })
            }
            StreamEventKind::ToolComplete {
                name,
                call_id,
                input,
                result,
                is_error,
            } => Some(AgentEvent::ToolComplete {
                name,
                call_id,
                input,
                result,
                is_error,
            }),
            StreamEventKind::TurnComplete {
                turn_number,
                success,
                duration_ms,
                cost_usd,
            } => Some(AgentEvent::TurnComplete {
                turn_number,
                success,
                duration_ms,
                cost_usd,
            }),
            StreamEventKind::Error { error, context } => Some(AgentEvent::Error { error, context }),
            StreamEventKind::Unrecognized => None,
        }
    }
}

impl AgentEvent {
    pub fn is_turn_complete(&self) -> bool {
        matches!(self, AgentEvent::TurnComplete { .. })
    }
}

/// One native (backend-specific) event. A multiplexed transport (the `rpc`
/// backend) overrides `scope_id` to return its thread/session tag; backends
/// with one event stream per subprocess leave the default (never filtered).
pub trait NativeEvent: Send + 'static {
    fn scope_id(&self) -> Option<&str> {
        None
    }

    fn classify(self) -> StreamEventKind;
}
