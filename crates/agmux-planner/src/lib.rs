//! The multi-agent Planner (spec §4.7): a `StateMachine` over
//! `{idle, planning, designing, building, reviewing, waiting_for_input,
//! completed, failed}`, an iteration loop composing designer/builder/
//! reviewer sub-agents, and best-effort checkpointing.
//!
//! Dependency order mirrors §2's weighting: `state` (the FSM, no
//! dependents) → `types` (the data the loop passes between phases) →
//! `agent`/`change_detector` (the collaborators the loop calls out to) →
//! `checkpoint` → `planner` (ties it together) → `feedback` (pure
//! formatting, used by the loop when it re-prompts the builder).

mod agent;
mod change_detector;
mod checkpoint;
mod error;
mod feedback;
mod planner;
mod state;
mod types;

pub use agent::{ProviderSubAgentRunner, Role, SubAgentOutcome, SubAgentRunner};
pub use change_detector::{ChangeDetector, GitChangeDetector};
pub use checkpoint::CheckpointManager;
pub use error::{Error, Result};
pub use feedback::format_feedback;
pub use planner::{Planner, PlannerProgressEvent, ProgressSink};
pub use state::{PlannerState, StateMachine, Transition};
pub use types::{
    BuildRequest, Checkpoint, DesignResponse, ExitReason, FileChangeSet, IterationConfig,
    IterationResult, Phase, PhaseStats, PhaseUsage, ReviewIssue, ReviewResponse, Severity,
};
