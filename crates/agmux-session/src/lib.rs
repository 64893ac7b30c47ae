//! Canonical session transcript: the ring-buffered `OutputBuffer`, the
//! `SessionModel` (single source of truth for one session's meta/progress/
//! transcript), the envelope strippers, and the streaming `MessageParser`.
//!
//! Dependency order within this crate mirrors the pipeline a session's raw
//! bytes travel through: envelope strippers reduce whatever on-disk/wire
//! shape is in play down to one canonical vocabulary, the parser dispatches
//! that vocabulary against a model, and the model is the only thing that
//! touches the output buffer directly.

mod envelope;
mod model;
mod output_buffer;
mod parser;
mod tool_format;

pub use envelope::{
    strip_live_line, strip_raw_line, strip_sdk_recorder_line, RawLineOutcome, RawLogLoader,
    SdkRecorderEnvelope,
};
pub use model::{Observer, SessionEvent, SessionModel};
pub use output_buffer::{merge_delta_with_overlap, OutputBuffer, DEFAULT_CAPACITY};
pub use parser::MessageParser;
pub use tool_format::format_tool_content;
