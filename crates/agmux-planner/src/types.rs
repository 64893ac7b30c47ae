//! Data exchanged between the iteration loop and its sub-agents (spec
//! §4.7.2-§4.7.4). `IterationConfig`'s guards use `Option<T>` rather than a
//! "zero means unbounded" sentinel — idiomatic for Rust, and behaviorally
//! identical (`None` ⇔ "when non-zero" being false). Recorded in
//! `DESIGN.md` as an Open Question resolution, not a silent deviation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::PlannerState;

/// Termination guards for one Planner mission (spec §4.7 `IterationConfig`).
#[derive(Debug, Clone)]
pub struct IterationConfig {
    pub max_iterations: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub max_duration: Option<Duration>,
    pub auto_approve: bool,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self { max_iterations: None, max_budget_usd: None, max_duration: None, auto_approve: false }
    }
}

/// The four phases cost/tokens are attributed to (spec glossary "Phase").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Designing,
    Building,
    Reviewing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Designing => "designing",
            Phase::Building => "building",
            Phase::Reviewing => "reviewing",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub calls: u32,
}

impl PhaseUsage {
    fn accumulate(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cost_usd += cost_usd;
        self.calls += 1;
    }
}

/// Total token/cost usage broken down by phase (spec §4.7 `PhaseStats`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseStats {
    #[serde(default)]
    usage: HashMap<Phase, PhaseUsage>,
}

impl PhaseStats {
    pub fn record(&mut self, phase: Phase, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.usage.entry(phase).or_default().accumulate(input_tokens, output_tokens, cost_usd);
    }

    pub fn for_phase(&self, phase: Phase) -> PhaseUsage {
        self.usage.get(&phase).copied().unwrap_or_default()
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.usage.values().map(|u| u.cost_usd).sum()
    }
}

/// The designer sub-agent's report (§4.7 "Input: a `DesignResponse` and a
/// `BuildRequest`").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesignResponse {
    pub summary: String,
    pub design_doc: String,
    pub cost_usd: f64,
}

/// What the builder is asked to do this iteration. `feedback` is populated
/// from the prior iteration's rejected review (spec §4.7.2 step 6, §4.7.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRequest {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<DesignResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Info,
}

/// One reviewer finding, rendered by `format_feedback` (spec §4.7.3:
/// `N. [severity] message` + optional `File:`/`Suggestion:` lines).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub summary: String,
    pub issues: Vec<ReviewIssue>,
    pub cost_usd: f64,
}

impl ReviewResponse {
    /// Spec §8: "for every `IterationResult` with `exit_reason = accepted`:
    /// `last_review.HasCriticalIssues()` is false".
    pub fn has_critical_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }
}

/// Files touched by one sub-agent call, deduplicated set union as the loop
/// accumulates across iterations (spec §4.7.2 step 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileChangeSet {
    pub created: Vec<String>,
    pub modified: Vec<String>,
}

impl FileChangeSet {
    pub fn merge_into(&self, created: &mut Vec<String>, modified: &mut Vec<String>) {
        for path in &self.created {
            if !created.contains(path) {
                created.push(path.clone());
            }
        }
        for path in &self.modified {
            if !modified.contains(path) && !created.contains(path) {
                modified.push(path.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Accepted,
    Budget,
    Timeout,
    MaxIterations,
    Error,
    Interrupt,
}

impl ExitReason {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitReason::Accepted)
    }
}

/// Output of one full `run_iteration_loop` call (spec §4.7.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    pub exit_reason: ExitReason,
    pub iteration_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review: Option<ReviewResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_error: Option<String>,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
    pub total_cost_usd: f64,
}

/// Durable snapshot of the Planner's progress (spec §4.7.4 `Checkpoint`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase: PlannerState,
    pub mission: String,
    pub last_updated: DateTime<Utc>,
    pub total_cost: f64,
    pub iteration_count: u32,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Checkpoint {
    /// True unless the recorded phase is a terminal successful phase (spec
    /// §4.7.4 `CanResume()`). A hard `Failed` checkpoint also can't resume:
    /// there is nothing left to retry without operator intervention
    /// (`ForceState`/`Reset`), matching `StateMachine`'s own terminal set.
    pub fn can_resume(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// The phase to resume at, or `None` if the mission already concluded
    /// (spec §4.7.4 `ResumePhase()`).
    pub fn resume_phase(&self) -> Option<PlannerState> {
        self.can_resume().then_some(self.phase)
    }
}

mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_critical_issues_requires_critical_severity() {
        let mut review = ReviewResponse::default();
        assert!(!review.has_critical_issues());
        review.issues.push(ReviewIssue {
            severity: Severity::Minor,
            message: "nit".into(),
            file: None,
            line: None,
            suggestion: None,
        });
        assert!(!review.has_critical_issues());
        review.issues.push(ReviewIssue {
            severity: Severity::Critical,
            message: "data race".into(),
            file: Some("src/lib.rs".into()),
            line: Some(42),
            suggestion: None,
        });
        assert!(review.has_critical_issues());
    }

    #[test]
    fn file_change_set_merges_without_duplicates() {
        let mut created = vec!["a.rs".to_string()];
        let mut modified = vec!["b.rs".to_string()];
        let set = FileChangeSet {
            created: vec!["a.rs".to_string(), "c.rs".to_string()],
            modified: vec!["b.rs".to_string(), "a.rs".to_string()],
        };
        set.merge_into(&mut created, &mut modified);
        assert_eq!(created, vec!["a.rs", "c.rs"]);
        assert_eq!(modified, vec!["b.rs"]);
    }

    #[test]
    fn phase_stats_accumulates_per_phase() {
        let mut stats = PhaseStats::default();
        stats.record(Phase::Building, 100, 50, 0.02);
        stats.record(Phase::Building, 10, 5, 0.01);
        stats.record(Phase::Reviewing, 20, 20, 0.005);
        assert_eq!(stats.for_phase(Phase::Building).calls, 2);
        assert!((stats.for_phase(Phase::Building).cost_usd - 0.03).abs() < 1e-9);
        assert!((stats.total_cost_usd() - 0.035).abs() < 1e-9);
    }

    #[test]
    fn checkpoint_cannot_resume_once_terminal() {
        let cp = Checkpoint {
            phase: PlannerState::Completed,
            mission: "m".into(),
            last_updated: Utc::now(),
            total_cost: 1.0,
            iteration_count: 2,
            files_created: vec![],
            files_modified: vec![],
            last_error: None,
        };
        assert!(!cp.can_resume());
        assert_eq!(cp.resume_phase(), None);
    }

    #[test]
    fn checkpoint_resumes_at_recorded_non_terminal_phase() {
        let cp = Checkpoint {
            phase: PlannerState::Reviewing,
            mission: "m".into(),
            last_updated: Utc::now(),
            total_cost: 1.0,
            iteration_count: 2,
            files_created: vec![],
            files_modified: vec![],
            last_error: None,
        };
        assert_eq!(cp.resume_phase(), Some(PlannerState::Reviewing));
    }
}
