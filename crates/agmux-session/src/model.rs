//! The Session Model: single source of truth for one session's transcript
//! (spec §4.4). Owns `SessionMeta`+`ProgressSnapshot` under one lock, an
//! independently-locked `OutputBuffer`, and a synchronous observer list.

use std::sync::{Arc, RwLock};

use agmux_types::{
    Error, OutputLine, ProgressSnapshot, Result, SessionMeta, SessionStatus, ToolCallId,
};

use crate::output_buffer::OutputBuffer;

/// Notifications fired synchronously, with no lock held, after the model
/// has already been mutated (spec §4.4 "Observer contract", §5 "ordering
/// guarantees": the Parser mutates, then calls observers).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MetaUpdated,
    StatusChanged { old: SessionStatus, new: SessionStatus },
    OutputAppended,
    ProgressUpdated,
}

/// A synchronous, non-reentrant callback. Implementations must be fast — a
/// malfunctioning observer stalls the Parser, an accepted trade-off per
/// spec §4.4 since the TUI is the only observer and is non-blocking.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> Observer for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

struct ModelState {
    meta: SessionMeta,
    progress: ProgressSnapshot,
}

pub struct SessionModel {
    state: RwLock<ModelState>,
    output: OutputBuffer,
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl SessionModel {
    pub fn new(meta: SessionMeta, buffer_capacity: i64) -> Self {
        Self {
            state: RwLock::new(ModelState {
                meta,
                progress: ProgressSnapshot::default(),
            }),
            output: OutputBuffer::new(buffer_capacity),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.observers.write().unwrap().push(observer);
    }

    fn notify(&self, event: SessionEvent) {
        // Snapshot the observer list first so a subscriber added/removed
        // mid-notification can't deadlock on `observers`; callbacks then
        // run with no lock held, per spec §4.4.
        let observers = self.observers.read().unwrap().clone();
        for observer in observers {
            observer.on_event(&event);
        }
    }

    // --- Write API (spec §4.4) -------------------------------------------

    pub fn set_meta(&self, meta: SessionMeta) {
        self.state.write().unwrap().meta = meta;
        self.notify(SessionEvent::MetaUpdated);
    }

    /// Rejects transitions away from a terminal status (spec §4.4,
    /// §8 "at most one transition ... into each terminal state").
    pub fn update_status(&self, new: SessionStatus) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let old = state.meta.status;
        if old.is_terminal() {
            return Err(Error::lifecycle_guard(format!(
                "cannot transition from terminal status {old:?}"
            )));
        }
        state.meta.status = new;
        drop(state);
        self.notify(SessionEvent::StatusChanged { old, new });
        Ok(())
    }

    /// Sets the session id only if currently empty (spec §4.4
    /// `PatchSessionID`): used when the id lives in an outer envelope
    /// rather than the inner message.
    pub fn patch_session_id(&self, id: agmux_types::SessionId) {
        let mut state = self.state.write().unwrap();
        if state.meta.session_id.is_empty() {
            state.meta.session_id = id;
            drop(state);
            self.notify(SessionEvent::MetaUpdated);
        }
    }

    pub fn append_output(&self, line: OutputLine) {
        self.output.append(line);
        self.notify(SessionEvent::OutputAppended);
    }

    pub fn append_streaming_text(&self, delta: &str) {
        self.output.append_streaming_text(delta);
        self.notify(SessionEvent::OutputAppended);
    }

    pub fn append_streaming_thinking(&self, delta: &str) {
        if delta.trim().is_empty() {
            return;
        }
        self.output.append_streaming_thinking(delta);
        self.notify(SessionEvent::OutputAppended);
    }

    /// Applies `f` to the most-recent `tool_start` line matching `tool_id`,
    /// under copy-on-write semantics; notifies iff found (spec §4.4).
    pub fn update_tool(&self, tool_id: &ToolCallId, f: impl FnOnce(&mut OutputLine)) {
        if self.output.update_tool_by_id(tool_id, f) {
            self.notify(SessionEvent::OutputAppended);
        }
    }

    pub fn update_progress(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut state = self.state.write().unwrap();
        f(&mut state.progress);
        drop(state);
        self.notify(SessionEvent::ProgressUpdated);
    }

    // --- Read API: immutable snapshots (spec §4.4) ------------------------

    pub fn meta(&self) -> SessionMeta {
        self.state.read().unwrap().meta.clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.state.read().unwrap().progress.clone()
    }

    pub fn output(&self) -> Vec<OutputLine> {
        self.output.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmux_types::{OutputLineType, SessionMeta};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn model() -> SessionModel {
        SessionModel::new(SessionMeta::new("sonnet", "/tmp/work"), 1000)
    }

    #[test]
    fn update_status_rejects_transitions_from_terminal() {
        let m = model();
        m.set_meta({
            let mut meta = m.meta();
            meta.status = SessionStatus::Completed;
            meta
        });
        let err = m.update_status(SessionStatus::Running).unwrap_err();
        assert!(err.to_string().contains("terminal"));
        assert_eq!(m.meta().status, SessionStatus::Completed);
    }

    #[test]
    fn patch_session_id_only_applies_once() {
        let m = model();
        m.patch_session_id(agmux_types::SessionId::new("from-log"));
        m.patch_session_id(agmux_types::SessionId::new("overwrite-attempt"));
        assert_eq!(m.meta().session_id.as_str(), "from-log");
    }

    #[test]
    fn observers_see_post_mutation_state_with_no_lock_held() {
        let m = model();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        m.subscribe(Arc::new(move |event: &SessionEvent| {
            if matches!(event, SessionEvent::OutputAppended) {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        }));
        m.append_output(OutputLine::new(OutputLineType::Text, "hi"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(m.output().len(), 1);
    }

    #[test]
    fn tool_lifecycle_start_then_result() {
        let m = model();
        m.append_output(OutputLine::tool_start(
            ToolCallId::new("t1"),
            "Read",
            "Read /foo.go",
            None,
        ));
        m.update_tool(&ToolCallId::new("t1"), |line| {
            line.tool_state = Some(agmux_types::ToolState::Complete);
            line.tool_result = Some(serde_json::json!({"ok": true}));
        });
        m.update_progress(|p| p.clear_current_tool());

        let out = m.output();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tool_state, Some(agmux_types::ToolState::Complete));
        assert!(out[0].tool_result.is_some());
        assert!(m.progress().current_tool.is_none());
    }
}
