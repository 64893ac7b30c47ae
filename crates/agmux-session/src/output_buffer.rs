//! Bounded ring buffer of `OutputLine`s (spec §4.4.1).
//!
//! Uses a plain `std::sync::RwLock` rather than an async one: every
//! operation here is synchronous and fast (no `.await` inside the lock),
//! so there is nothing an async lock would buy (see `SPEC_FULL.md` §5).

use std::sync::RwLock;

use agmux_types::{OutputLine, OutputLineType, ToolCallId, ToolState};

/// `<= 0` means uncapped (used for full-history replay, e.g. loading a
/// session from disk for display rather than live truncated viewing).
pub const DEFAULT_CAPACITY: i64 = 1000;

pub struct OutputBuffer {
    capacity: i64,
    lines: RwLock<Vec<OutputLine>>,
}

impl OutputBuffer {
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity,
            lines: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    fn is_uncapped(&self) -> bool {
        self.capacity <= 0
    }

    /// Appends a line unconditionally (no merge). At capacity, zeroes the
    /// slot about to be evicted first so any pointer-bearing fields (the
    /// tool input/result maps) can be reclaimed immediately, then evicts
    /// the oldest entry (spec §4.4.1 `Append`).
    pub fn append(&self, line: OutputLine) {
        let mut lines = self.lines.write().unwrap();
        if !self.is_uncapped() && lines.len() as i64 >= self.capacity {
            if let Some(slot) = lines.first_mut() {
                *slot = OutputLine::text("");
            }
            lines.remove(0);
        }
        lines.push(line);
    }

    /// Merges a streaming text delta onto the last line if it is itself a
    /// `text` line; otherwise appends a new one. Plain concatenation is
    /// correct here because live deltas are non-overlapping token chunks
    /// (spec §4.4.1 — the overlap-merge helper is a distinct concern, see
    /// `merge_delta_with_overlap`).
    pub fn append_streaming_text(&self, delta: &str) {
        self.append_streaming(OutputLineType::Text, delta);
    }

    /// As `append_streaming_text`, but whitespace-only deltas are dropped
    /// (spec §4.4.1).
    pub fn append_streaming_thinking(&self, delta: &str) {
        if delta.trim().is_empty() {
            return;
        }
        self.append_streaming(OutputLineType::Thinking, delta);
    }

    fn append_streaming(&self, kind: OutputLineType, delta: &str) {
        let mut lines = self.lines.write().unwrap();
        if let Some(last) = lines.last_mut()
            && last.line_type == kind
        {
            last.content.push_str(delta);
            return;
        }
        drop(lines);
        let line = match kind {
            OutputLineType::Text => OutputLine::text(delta),
            OutputLineType::Thinking => OutputLine::thinking(delta),
            _ => unreachable!("append_streaming only called for Text/Thinking"),
        };
        self.append(line);
    }

    /// Scans newest-to-oldest for a `tool_start` line with matching
    /// `tool_id`, deep-copies its `tool_input` before handing it to `f`
    /// (spec §4.4 copy-on-write), and writes the result back in place.
    /// Returns whether a match was found. Newest-first prevents an old
    /// completed tool call from shadowing a re-issue of the same id
    /// (spec §4.4.1).
    pub fn update_tool_by_id(&self, id: &ToolCallId, f: impl FnOnce(&mut OutputLine)) -> bool {
        let mut lines = self.lines.write().unwrap();
        for line in lines.iter_mut().rev() {
            if line.line_type == OutputLineType::ToolStart && line.tool_id.as_ref() == Some(id) {
                // Deep-copy tool_input before mutation: the caller's `f`
                // must not be able to alias a snapshot already handed out.
                if let Some(input) = &line.tool_input {
                    line.tool_input = Some(input.clone());
                }
                f(line);
                return true;
            }
        }
        false
    }

    /// Deep-copied snapshot: neither the returned `Vec` nor any line's
    /// map-typed fields alias the buffer (spec §8 deep-copy property).
    pub fn snapshot(&self) -> Vec<OutputLine> {
        self.lines.read().unwrap().iter().map(OutputLine::deep_clone).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merges a delta that may duplicate trailing characters across chunks: if
/// `existing` ends with some prefix of `delta` (maximizing overlap length),
/// returns `existing + delta[overlap:]`; otherwise plain concatenation
/// (spec §4.4.2). Used only by envelope strippers known to occasionally
/// double-emit boundary characters — never by live streaming appenders.
pub fn merge_delta_with_overlap(existing: &str, delta: &str) -> String {
    let max_overlap = existing.len().min(delta.len());
    for overlap in (1..=max_overlap).rev() {
        if existing.ends_with(&delta[..overlap]) {
            let mut out = String::with_capacity(existing.len() + delta.len() - overlap);
            out.push_str(existing);
            out.push_str(&delta[overlap..]);
            return out;
        }
    }
    let mut out = String::with_capacity(existing.len() + delta.len());
    out.push_str(existing);
    out.push_str(delta);
    out
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmux_types::ToolCallId;
    use serde_json::{Map, Value};

    #[test]
    fn streaming_text_merges_adjacent_deltas() {
        let buf = OutputBuffer::with_default_capacity();
        buf.append_streaming_text("Hello");
        buf.append_streaming_text(" ");
        buf.append_streaming_text("world");
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].content, "Hello world");
    }

    #[test]
    fn non_text_line_breaks_the_merge_chain() {
        let buf = OutputBuffer::with_default_capacity();
        buf.append_streaming_text("a");
        buf.append(OutputLine::new(OutputLineType::Status, "status"));
        buf.append_streaming_text("b");
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].content, "a");
        assert_eq!(snap[2].content, "b");
    }

    #[test]
    fn whitespace_only_thinking_delta_creates_no_line() {
        let buf = OutputBuffer::with_default_capacity();
        buf.append_streaming_thinking("   \n\t ");
        assert!(buf.is_empty());
    }

    #[test]
    fn ring_evicts_oldest_first_at_capacity() {
        let buf = OutputBuffer::new(3);
        for c in ["a", "b", "c", "d", "e"] {
            buf.append_streaming_text(c);
            buf.append(OutputLine::new(OutputLineType::Status, "x"));
        }
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 3);
        let contents: Vec<&str> = snap.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["d", "x", "e"]);
    }

    #[test]
    fn update_tool_by_id_finds_newest_matching_id_and_deep_copies_input() {
        let buf = OutputBuffer::with_default_capacity();
        let mut input = Map::new();
        input.insert("file_path".into(), Value::String("/foo.go".into()));
        buf.append(OutputLine::tool_start(
            ToolCallId::new("t1"),
            "Read",
            "Read /foo.go",
            Some(input),
        ));

        let found = buf.update_tool_by_id(&ToolCallId::new("t1"), |line| {
            line.tool_state = Some(ToolState::Complete);
            line.tool_result = Some(Value::String("ok".into()));
            if let Some(map) = line.tool_input.as_mut() {
                map.insert("mutated".into(), Value::Bool(true));
            }
        });
        assert!(found);

        let snap = buf.snapshot();
        assert_eq!(snap[0].tool_state, Some(ToolState::Complete));
        // Mutation happened on the stored line, but the snapshot is still a
        // deep copy independent of the buffer's own storage.
        let mut snap2 = buf.snapshot();
        snap2[0].tool_input.as_mut().unwrap().insert("again".into(), Value::Bool(true));
        assert!(buf.snapshot()[0].tool_input.as_ref().unwrap().get("again").is_none());
    }

    #[test]
    fn update_tool_by_id_returns_false_when_not_found() {
        let buf = OutputBuffer::with_default_capacity();
        assert!(!buf.update_tool_by_id(&ToolCallId::new("missing"), |_| {}));
    }

    #[test]
    fn overlap_merge_collapses_duplicated_boundary() {
        assert_eq!(merge_delta_with_overlap("hello wor", "world"), "hello world");
        assert_eq!(merge_delta_with_overlap("hello ", "world"), "hello world");
        assert_eq!(merge_delta_with_overlap("", "world"), "world");
    }
}
