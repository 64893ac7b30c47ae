//! Shared data model for agmux: identifiers, transcript lines, session
//! metadata, progress snapshots, and the error taxonomy (spec §3, §7).
//!
//! Kept dependency-free of `tokio`/process concerns on purpose: every other
//! crate in the workspace (providers, session, manager, planner) depends on
//! this one, never the reverse.

mod error;
mod ids;
mod output;
mod progress;
mod session_meta;

pub use error::{Error, Result};
pub use ids::{SessionId, ToolCallId};
pub use output::{OutputLine, OutputLineType, ToolState, Usage};
pub use progress::ProgressSnapshot;
pub use session_meta::{SessionMeta, SessionStatus};
