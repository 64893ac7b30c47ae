//! Ties the state machine, iteration config, phase stats, checkpointing,
//! and sub-agent collaborators together into the Planner (spec §4.7).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use agmux_providers::CancellationToken;

use crate::agent::{Role, SubAgentOutcome, SubAgentRunner};
use crate::change_detector::ChangeDetector;
use crate::checkpoint::CheckpointManager;
use crate::error::{Error, Result};
use crate::feedback::format_feedback;
use crate::state::{PlannerState, StateMachine};
use crate::types::{
    BuildRequest, Checkpoint, DesignResponse, ExitReason, FileChangeSet, IterationConfig,
    IterationResult, Phase, PhaseStats, ReviewResponse,
};

/// Progress notifications a UI/TUI can subscribe to (spec §4.7.2: "emit a
/// ... progress event" at several points in the loop). Distinct from
/// `agmux_session::SessionEvent` — the Planner has no transcript of its
/// own, only phase/iteration bookkeeping.
#[derive(Debug, Clone)]
pub enum PlannerProgressEvent {
    IterationStart { iteration: u32 },
    PhaseChange { phase: Phase },
    IterationAccepted { iteration: u32 },
    IterationRejectedContinuing { iteration: u32 },
}

pub type ProgressSink = Arc<dyn Fn(PlannerProgressEvent) + Send + Sync>;

/// The multi-agent Planner: one mission, one state machine, one
/// design→build→review loop (spec §4.7).
pub struct Planner {
    state: Mutex<StateMachine>,
    config: IterationConfig,
    phase_stats: Mutex<PhaseStats>,
    checkpoints: CheckpointManager,
    change_detector: Arc<dyn ChangeDetector>,
    sub_agents: Arc<dyn SubAgentRunner>,
    work_dir: PathBuf,
    mission: String,
    progress: Option<ProgressSink>,
}

impl Planner {
    pub fn new(
        mission: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        config: IterationConfig,
        checkpoints: CheckpointManager,
        change_detector: Arc<dyn ChangeDetector>,
        sub_agents: Arc<dyn SubAgentRunner>,
    ) -> Self {
        Self {
            state: Mutex::new(StateMachine::new()),
            config,
            phase_stats: Mutex::new(PhaseStats::default()),
            checkpoints,
            change_detector,
            sub_agents,
            work_dir: work_dir.into(),
            mission: mission.into(),
            progress: None,
        }
    }

    pub fn with_progress_sink(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn state(&self) -> PlannerState {
        self.state.lock().unwrap().current()
    }

    pub fn phase_stats(&self) -> PhaseStats {
        self.phase_stats.lock().unwrap().clone()
    }

    fn emit(&self, event: PlannerProgressEvent) {
        if let Some(sink) = &self.progress {
            sink(event);
        }
    }

    fn transition(&self, to: PlannerState, trigger: &str) -> Result<()> {
        self.state.lock().unwrap().transition(to, trigger)
    }

    /// Spec §4.7.1: `idle -> planning` is the only move out of `idle`.
    pub fn start_mission(&self) -> Result<()> {
        self.transition(PlannerState::Planning, "mission accepted")
    }

    fn check_iteration_limit(&self, iteration: u32) -> Result<()> {
        if let Some(max) = self.config.max_iterations
            && iteration > max
        {
            return Err(Error::IterationLimitExceeded { iteration, max });
        }
        Ok(())
    }

    async fn checkpoint_now(
        &self,
        phase: PlannerState,
        iteration: u32,
        files_created: &[String],
        files_modified: &[String],
        last_error: Option<String>,
    ) {
        let checkpoint = Checkpoint {
            phase,
            mission: self.mission.clone(),
            last_updated: chrono::Utc::now(),
            total_cost: self.phase_stats.lock().unwrap().total_cost_usd(),
            iteration_count: iteration,
            files_created: files_created.to_vec(),
            files_modified: files_modified.to_vec(),
            last_error,
        };
        self.checkpoints.save(&checkpoint).await;
    }

    /// Runs the designer sub-agent once (spec §4.7: "Input: a
    /// `DesignResponse`"). Not part of the build↔review iteration loop
    /// itself — it's the planning phase's own round trip:
    /// `planning -> designing -> planning`.
    pub async fn call_designer(&self, iteration: u32, prompt: &str) -> Result<DesignResponse> {
        self.check_iteration_limit(iteration)?;
        self.transition(PlannerState::Designing, "planning selected design phase")?;
        self.emit(PlannerProgressEvent::PhaseChange { phase: Phase::Designing });

        let outcome = self.sub_agents.run(Role::Designer, prompt, &self.work_dir).await;
        let result = match outcome {
            Ok(outcome) => {
                self.phase_stats.lock().unwrap().record(
                    Phase::Designing,
                    outcome.input_tokens,
                    outcome.output_tokens,
                    outcome.cost_usd,
                );
                self.checkpoint_now(PlannerState::Designing, iteration, &[], &[], None).await;
                self.transition(PlannerState::Planning, "design complete")?;
                Ok(DesignResponse {
                    summary: first_line(&outcome.text),
                    design_doc: outcome.text,
                    cost_usd: outcome.cost_usd,
                })
            }
            Err(err) => {
                self.checkpoint_now(PlannerState::Designing, iteration, &[], &[], Some(err.to_string())).await;
                Err(err)
            }
        };
        result
    }

    /// Runs the builder sub-agent (spec §4.7.2 step 3). Assumes the caller
    /// has already transitioned into `Building`. Returns the sub-agent's
    /// raw outcome plus the resolved file-change set — falling back to the
    /// `ChangeDetector` (git diff) when the sub-agent didn't report tool
    /// events directly (spec §4.7.2 "for non-Claude sub-agents").
    pub async fn call_builder(
        &self,
        iteration: u32,
        build_req: &BuildRequest,
    ) -> Result<(SubAgentOutcome, FileChangeSet)> {
        self.check_iteration_limit(iteration)?;
        self.emit(PlannerProgressEvent::PhaseChange { phase: Phase::Building });

        let prompt = build_prompt(build_req);
        let outcome = self.sub_agents.run(Role::Builder, &prompt, &self.work_dir).await;
        match outcome {
            Ok(outcome) => {
                self.phase_stats.lock().unwrap().record(
                    Phase::Building,
                    outcome.input_tokens,
                    outcome.output_tokens,
                    outcome.cost_usd,
                );
                let changes = match &outcome.files_touched {
                    Some(changes) => changes.clone(),
                    None => self.change_detector.detect(&self.work_dir).await.unwrap_or_default(),
                };
                self.checkpoint_now(
                    PlannerState::Building,
                    iteration,
                    &changes.created,
                    &changes.modified,
                    None,
                )
                .await;
                Ok((outcome, changes))
            }
            Err(err) => {
                self.checkpoint_now(PlannerState::Building, iteration, &[], &[], Some(err.to_string())).await;
                Err(err)
            }
        }
    }

    /// Runs the reviewer sub-agent (spec §4.7.2 step 4). Assumes the
    /// caller has already transitioned into `Reviewing`. The reviewer's
    /// response is expected as JSON matching `ReviewResponse`'s shape; a
    /// reviewer that returns unstructured prose is treated as "no critical
    /// issues found, with a free-text summary" rather than a hard failure:
    /// the wire format of the reviewer's own output is an external backend's
    /// concern, not this crate's.
    pub async fn call_reviewer(
        &self,
        iteration: u32,
        task: &str,
        files_changed: &FileChangeSet,
        original_design: Option<&DesignResponse>,
    ) -> Result<ReviewResponse> {
        self.check_iteration_limit(iteration)?;
        self.emit(PlannerProgressEvent::PhaseChange { phase: Phase::Reviewing });

        let prompt = review_prompt(task, files_changed, original_design);
        let outcome = self.sub_agents.run(Role::Reviewer, &prompt, &self.work_dir).await;
        match outcome {
            Ok(outcome) => {
                self.phase_stats.lock().unwrap().record(
                    Phase::Reviewing,
                    outcome.input_tokens,
                    outcome.output_tokens,
                    outcome.cost_usd,
                );
                let mut review = parse_review_or_fallback(&outcome.text);
                review.cost_usd = outcome.cost_usd;
                self.checkpoint_now(
                    PlannerState::Reviewing,
                    iteration,
                    &files_changed.created,
                    &files_changed.modified,
                    None,
                )
                .await;
                Ok(review)
            }
            Err(err) => {
                self.checkpoint_now(
                    PlannerState::Reviewing,
                    iteration,
                    &files_changed.created,
                    &files_changed.modified,
                    Some(err.to_string()),
                )
                .await;
                Err(err)
            }
        }
    }

    /// The build→review iteration loop (spec §4.7.2). `cancel` is checked
    /// first among the guards, ahead of elapsed time, budget, and
    /// iteration count, in that order.
    pub async fn run_iteration_loop(
        &self,
        cancel: CancellationToken,
        design: DesignResponse,
        mut build_req: BuildRequest,
    ) -> IterationResult {
        let start = Instant::now();
        let mut iteration: u32 = 1;
        let mut files_created: Vec<String> = Vec::new();
        let mut files_modified: Vec<String> = Vec::new();
        let mut last_review: Option<ReviewResponse> = None;
        build_req.design = Some(design);

        loop {
            self.emit(PlannerProgressEvent::IterationStart { iteration });

            if cancel.is_cancelled() {
                return self.finish(
                    ExitReason::Interrupt,
                    iteration,
                    last_review,
                    None,
                    files_created,
                    files_modified,
                    start,
                );
            }
            if let Some(max_duration) = self.config.max_duration
                && start.elapsed() >= max_duration
            {
                return self.finish(
                    ExitReason::Timeout,
                    iteration,
                    last_review,
                    None,
                    files_created,
                    files_modified,
                    start,
                );
            }
            if let Some(max_budget) = self.config.max_budget_usd
                && self.phase_stats.lock().unwrap().total_cost_usd() >= max_budget
            {
                return self.finish(
                    ExitReason::Budget,
                    iteration,
                    last_review,
                    None,
                    files_created,
                    files_modified,
                    start,
                );
            }
            if let Some(max_iterations) = self.config.max_iterations
                && iteration > max_iterations
            {
                // `iteration` has already been bumped past `max_iterations`
                // by the previous pass's rejected-and-retrying step; report
                // the number of iterations actually completed, not the
                // would-be-next one (spec §8 scenario 6: `iteration_count ==
                // max_iterations`).
                return self.finish(
                    ExitReason::MaxIterations,
                    max_iterations,
                    last_review,
                    None,
                    files_created,
                    files_modified,
                    start,
                );
            }

            if let Err(err) = self.transition(PlannerState::Building, "iteration build") {
                return self.finish(
                    ExitReason::Error,
                    iteration,
                    last_review,
                    Some(err.to_string()),
                    files_created,
                    files_modified,
                    start,
                );
            }
            let (outcome, changes) = match self.call_builder(iteration, &build_req).await {
                Ok(ok) => ok,
                Err(err) if err.is_cancelled() => {
                    return self.finish(
                        ExitReason::Interrupt,
                        iteration,
                        last_review,
                        None,
                        files_created,
                        files_modified,
                        start,
                    );
                }
                Err(err) => {
                    let _ = self.transition(PlannerState::Failed, "builder failed");
                    return self.finish(
                        ExitReason::Error,
                        iteration,
                        last_review,
                        Some(err.to_string()),
                        files_created,
                        files_modified,
                        start,
                    );
                }
            };
            let _ = outcome;
            changes.merge_into(&mut files_created, &mut files_modified);

            if let Err(err) = self.transition(PlannerState::Reviewing, "build complete") {
                return self.finish(
                    ExitReason::Error,
                    iteration,
                    last_review,
                    Some(err.to_string()),
                    files_created,
                    files_modified,
                    start,
                );
            }
            let current_changes = FileChangeSet { created: files_created.clone(), modified: files_modified.clone() };
            let review = match self
                .call_reviewer(iteration, &build_req.task, &current_changes, build_req.design.as_ref())
                .await
            {
                Ok(review) => review,
                Err(err) if err.is_cancelled() => {
                    return self.finish(
                        ExitReason::Interrupt,
                        iteration,
                        last_review,
                        None,
                        files_created,
                        files_modified,
                        start,
                    );
                }
                Err(err) => {
                    let _ = self.transition(PlannerState::Failed, "reviewer failed");
                    return self.finish(
                        ExitReason::Error,
                        iteration,
                        last_review,
                        Some(err.to_string()),
                        files_created,
                        files_modified,
                        start,
                    );
                }
            };

            if !review.has_critical_issues() {
                self.emit(PlannerProgressEvent::IterationAccepted { iteration });
                last_review = Some(review);
                let _ = self.transition(PlannerState::Completed, "no critical issues");
                return self.finish(
                    ExitReason::Accepted,
                    iteration,
                    last_review,
                    None,
                    files_created,
                    files_modified,
                    start,
                );
            }

            self.emit(PlannerProgressEvent::IterationRejectedContinuing { iteration });
            build_req.feedback = Some(format_feedback(&review));
            last_review = Some(review);
            if let Err(err) = self.transition(PlannerState::Planning, "iteration rejected, retrying") {
                return self.finish(
                    ExitReason::Error,
                    iteration,
                    last_review,
                    Some(err.to_string()),
                    files_created,
                    files_modified,
                    start,
                );
            }
            iteration += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        exit_reason: ExitReason,
        iteration_count: u32,
        last_review: Option<ReviewResponse>,
        final_error: Option<String>,
        files_created: Vec<String>,
        files_modified: Vec<String>,
        start: Instant,
    ) -> IterationResult {
        IterationResult {
            exit_reason,
            iteration_count,
            last_review,
            final_error,
            files_created,
            files_modified,
            total_duration: start.elapsed(),
            total_cost_usd: self.phase_stats.lock().unwrap().total_cost_usd(),
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

fn build_prompt(req: &BuildRequest) -> String {
    let mut prompt = req.task.clone();
    if let Some(design) = &req.design {
        prompt.push_str("\n\nDesign:\n");
        prompt.push_str(&design.design_doc);
    }
    if let Some(feedback) = &req.feedback {
        prompt.push_str("\n\nAddress this review feedback:\n");
        prompt.push_str(feedback);
    }
    prompt
}

fn review_prompt(task: &str, files_changed: &FileChangeSet, design: Option<&DesignResponse>) -> String {
    let mut prompt = format!("Review the following change for: {task}\n\nFiles changed:\n");
    for path in files_changed.created.iter().chain(files_changed.modified.iter()) {
        prompt.push_str("- ");
        prompt.push_str(path);
        prompt.push('\n');
    }
    if let Some(design) = design {
        prompt.push_str("\nOriginal design:\n");
        prompt.push_str(&design.design_doc);
    }
    prompt
}

/// Reviewer sub-agents are expected to answer with a JSON `ReviewResponse`;
/// a reviewer that doesn't (or can't) is treated as reporting no critical
/// issues, with its raw text kept as the summary, rather than failing the
/// iteration outright.
fn parse_review_or_fallback(text: &str) -> ReviewResponse {
    serde_json::from_str(text).unwrap_or_else(|_| ReviewResponse {
        summary: text.to_string(),
        issues: Vec::new(),
        cost_usd: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_detector::ChangeDetector;
    use crate::types::{ReviewIssue, Severity};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct NullChangeDetector;
    #[async_trait]
    impl ChangeDetector for NullChangeDetector {
        async fn detect(&self, _work_dir: &Path) -> Result<FileChangeSet> {
            Ok(FileChangeSet::default())
        }
    }

    /// Scripted sub-agent runner: builder always reports one new file;
    /// reviewer's response is driven by a shared counter so tests can flip
    /// from "critical issue" to "clean" after N calls.
    struct ScriptedAgents {
        reviewer_calls: AtomicU32,
        reviewer_clean_after: u32,
    }

    #[async_trait]
    impl SubAgentRunner for ScriptedAgents {
        async fn run(&self, role: Role, _prompt: &str, _work_dir: &Path) -> Result<SubAgentOutcome> {
            match role {
                Role::Designer => Ok(SubAgentOutcome {
                    text: "Plan: add a null check".to_string(),
                    cost_usd: 0.01,
                    ..Default::default()
                }),
                Role::Builder => Ok(SubAgentOutcome {
                    text: "applied the fix".to_string(),
                    cost_usd: 0.02,
                    files_touched: Some(FileChangeSet {
                        created: vec![],
                        modified: vec!["fix.rs".to_string()],
                    }),
                    ..Default::default()
                }),
                Role::Reviewer => {
                    let call = self.reviewer_calls.fetch_add(1, Ordering::SeqCst);
                    let review = if call < self.reviewer_clean_after {
                        ReviewResponse {
                            summary: "needs work".to_string(),
                            issues: vec![ReviewIssue {
                                severity: Severity::Critical,
                                message: "missing bounds check".to_string(),
                                file: Some("fix.rs".to_string()),
                                line: Some(10),
                                suggestion: None,
                            }],
                            cost_usd: 0.0,
                        }
                    } else {
                        ReviewResponse { summary: "looks good".to_string(), issues: vec![], cost_usd: 0.0 }
                    };
                    Ok(SubAgentOutcome {
                        text: serde_json::to_string(&review).unwrap(),
                        cost_usd: 0.005,
                        ..Default::default()
                    })
                }
            }
        }
    }

    fn planner(reviewer_clean_after: u32, config: IterationConfig) -> Planner {
        let dir = TempDir::new().unwrap();
        let checkpoints = CheckpointManager::new(dir.path(), agmux_types::SessionId::new("planner-test"));
        let agents = Arc::new(ScriptedAgents { reviewer_calls: AtomicU32::new(0), reviewer_clean_after });
        let p = Planner::new(
            "fix the bug",
            dir.path(),
            config,
            checkpoints,
            Arc::new(NullChangeDetector),
            agents,
        );
        // Keep the tempdir alive for the planner's lifetime by leaking it —
        // acceptable in tests, avoided in production code paths.
        std::mem::forget(dir);
        p
    }

    #[tokio::test]
    async fn iteration_accepted_on_first_pass() {
        let p = planner(0, IterationConfig { max_iterations: Some(3), ..Default::default() });
        p.start_mission().unwrap();
        let design = p.call_designer(1, "design the fix").await.unwrap();
        let build_req = BuildRequest { task: "fix the bug".to_string(), feedback: None, design: None };

        let result = p.run_iteration_loop(CancellationToken::new(), design, build_req).await;
        assert_eq!(result.exit_reason, ExitReason::Accepted);
        assert_eq!(result.iteration_count, 1);
        assert!(result.files_modified.contains(&"fix.rs".to_string()));
        assert_eq!(p.state(), PlannerState::Completed);
    }

    #[tokio::test]
    async fn iteration_exceeds_max_iterations_when_reviewer_always_rejects() {
        let p = planner(u32::MAX, IterationConfig { max_iterations: Some(3), ..Default::default() });
        p.start_mission().unwrap();
        let design = p.call_designer(1, "design the fix").await.unwrap();
        let build_req = BuildRequest { task: "fix the bug".to_string(), feedback: None, design: None };

        let result = p.run_iteration_loop(CancellationToken::new(), design, build_req).await;
        assert_eq!(result.exit_reason, ExitReason::MaxIterations);
        assert_eq!(result.iteration_count, 3);
        assert!(result.last_review.is_some());
    }

    #[tokio::test]
    async fn cancellation_before_loop_starts_yields_interrupt() {
        let p = planner(0, IterationConfig::default());
        p.start_mission().unwrap();
        let design = p.call_designer(1, "design the fix").await.unwrap();
        let build_req = BuildRequest { task: "fix the bug".to_string(), feedback: None, design: None };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = p.run_iteration_loop(cancel, design, build_req).await;
        assert_eq!(result.exit_reason, ExitReason::Interrupt);
    }

    #[tokio::test]
    async fn accepted_result_never_carries_critical_issues() {
        let p = planner(0, IterationConfig::default());
        p.start_mission().unwrap();
        let design = p.call_designer(1, "design the fix").await.unwrap();
        let build_req = BuildRequest { task: "fix the bug".to_string(), feedback: None, design: None };

        let result = p.run_iteration_loop(CancellationToken::new(), design, build_req).await;
        if result.exit_reason == ExitReason::Accepted {
            assert!(!result.last_review.unwrap().has_critical_issues());
        }
    }
}
