//! The Planner's finite state machine (spec §4.7.1): a terminal-set-and-
//! guarded-transition shape generalized from `SessionStatus`'s single
//! non-terminal → terminal jump to the full designer/builder/reviewer
//! phase graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerState {
    Idle,
    Planning,
    Designing,
    Building,
    Reviewing,
    WaitingForInput,
    Completed,
    Failed,
}

impl PlannerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlannerState::Completed | PlannerState::Failed)
    }

    /// The allowed destinations from this state (spec §4.7.1 table). Terminal
    /// states only permit `Reset()`, which bypasses this table entirely.
    fn allowed_destinations(&self) -> &'static [PlannerState] {
        use PlannerState::*;
        match self {
            Idle => &[Planning],
            Planning => &[Designing, Building, WaitingForInput, Completed, Failed],
            Designing => &[Planning, Building, Failed],
            Building => &[Planning, Reviewing, Failed],
            Reviewing => &[Planning, Building, Completed, Failed],
            WaitingForInput => &[Planning, Failed],
            Completed | Failed => &[],
        }
    }
}

/// One recorded transition, kept for post-mortem/debugging (spec §4.7.1
/// "appends a `(from,to,trigger)` record to a history list").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: PlannerState,
    pub to: PlannerState,
    pub trigger: String,
    pub at: DateTime<Utc>,
}

/// Owns the current `PlannerState` plus its transition history. Not
/// thread-safe on its own — the `Planner` wraps it in a mutex, the same way
/// `SessionModel` wraps its meta+progress under one lock.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: PlannerState,
    history: Vec<Transition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self { current: PlannerState::Idle, history: Vec::new() }
    }

    pub fn current(&self) -> PlannerState {
        self.current
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Checks the transition table and, on success, records the move (spec
    /// §4.7.1 `Transition(to, trigger)`). Rejects anything not in the
    /// table, including attempts to leave a terminal state other than via
    /// `reset`.
    pub fn transition(&mut self, to: PlannerState, trigger: impl Into<String>) -> Result<()> {
        if !self.current.allowed_destinations().contains(&to) {
            return Err(Error::InvalidTransition { from: self.current, to });
        }
        self.record(to, trigger);
        Ok(())
    }

    /// Bypasses the transition table. Recovery only (spec §4.7.1
    /// `ForceState(to, reason)`).
    pub fn force_state(&mut self, to: PlannerState, reason: impl Into<String>) {
        self.record(to, reason);
    }

    /// Returns to `idle` unconditionally and logs the transition (spec
    /// §4.7.1 `Reset()`), regardless of the current state.
    pub fn reset(&mut self, reason: impl Into<String>) {
        self.record(PlannerState::Idle, reason);
    }

    fn record(&mut self, to: PlannerState, trigger: impl Into<String>) {
        let from = self.current;
        self.current = to;
        self.history.push(Transition { from, to, trigger: trigger.into(), at: Utc::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlannerState::*;

    #[test]
    fn idle_only_advances_to_planning() {
        let mut sm = StateMachine::new();
        assert!(sm.transition(Completed, "bad").is_err());
        sm.transition(Planning, "mission accepted").unwrap();
        assert_eq!(sm.current(), Planning);
    }

    #[test]
    fn full_iteration_cycle_accepted() {
        let mut sm = StateMachine::new();
        sm.transition(Planning, "start").unwrap();
        sm.transition(Building, "design skipped").unwrap();
        sm.transition(Reviewing, "build done").unwrap();
        sm.transition(Completed, "no critical issues").unwrap();
        assert!(sm.current().is_terminal());
    }

    #[test]
    fn rejects_transition_out_of_terminal_state() {
        let mut sm = StateMachine::new();
        sm.transition(Planning, "start").unwrap();
        sm.transition(Failed, "sub-agent error").unwrap();
        let err = sm.transition(Planning, "retry").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { from: Failed, to: Planning }));
    }

    #[test]
    fn reset_returns_to_idle_from_any_state() {
        let mut sm = StateMachine::new();
        sm.transition(Planning, "start").unwrap();
        sm.transition(Failed, "boom").unwrap();
        sm.reset("operator retry");
        assert_eq!(sm.current(), Idle);
        assert_eq!(sm.history().last().unwrap().trigger, "operator retry");
    }

    #[test]
    fn force_state_bypasses_table() {
        let mut sm = StateMachine::new();
        sm.force_state(Reviewing, "resumed from checkpoint");
        assert_eq!(sm.current(), Reviewing);
    }

    #[test]
    fn reviewing_rejects_back_to_designing() {
        let mut sm = StateMachine::new();
        sm.transition(Planning, "start").unwrap();
        sm.transition(Building, "skip design").unwrap();
        sm.transition(Reviewing, "built").unwrap();
        assert!(sm.transition(Designing, "not allowed").is_err());
    }
}
