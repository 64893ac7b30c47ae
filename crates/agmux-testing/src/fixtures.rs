//! Sample data builders, for generating placeable sample data rather than
//! hand-rolling it inline in every test.

use agmux_session::SessionEvent;
use agmux_types::{OutputLine, SessionMeta, SessionStatus, ToolCallId};

/// A `SessionMeta` with reasonable defaults for tests that don't care about
/// the specific model/cwd.
pub fn session_meta() -> SessionMeta {
    SessionMeta::new("sonnet", "/tmp/agmux-test")
}

/// A short streamed-then-completed transcript: one text line, one tool
/// round trip, and a turn-end marker — enough to exercise most formatters
/// and observers without a real provider.
pub fn sample_output() -> Vec<OutputLine> {
    let mut input = serde_json::Map::new();
    input.insert("file_path".to_string(), serde_json::json!("/tmp/agmux-test/main.rs"));

    vec![
        OutputLine::text("Let me look at the file first."),
        OutputLine::tool_start(ToolCallId::new("call-1"), "Read", "Read(main.rs)", Some(input)),
    ]
}

/// Records every `SessionEvent` an `Observer` sees, for assertions against
/// the exact sequence emitted by a `SessionModel` mutation.
#[derive(Default)]
pub struct EventRecorder {
    events: std::sync::Mutex<Vec<SessionEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn idle_meta() -> SessionMeta {
    let mut meta = session_meta();
    meta.status = SessionStatus::Idle;
    meta
}
