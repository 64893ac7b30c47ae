//! `agmux run <mission>`: drives one planner mission end-to-end (spec
//! §4.7.2) and prints the final `IterationResult`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use agmux_planner::{
    BuildRequest, CheckpointManager, GitChangeDetector, IterationConfig, Planner,
    PlannerProgressEvent, ProviderSubAgentRunner,
};
use agmux_providers::registry::{spawn_provider, ProviderKind};
use agmux_providers::CancellationToken;
use agmux_types::SessionId;

use crate::args::{OutputFormat, RunArgs};

pub async fn handle(args: RunArgs, workspace: &std::path::Path, format: OutputFormat) -> Result<()> {
    let kind = ProviderKind::from_name(args.provider.as_str())
        .with_context(|| format!("unknown provider kind: {}", args.provider))?;
    let work_dir = match args.work_dir {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().context("could not determine current directory")?,
    };

    let designer = spawn_provider(kind, "designer", &args.program, Vec::new())
        .await
        .context("failed to start the designer sub-agent provider")?;
    let builder = spawn_provider(kind, "builder", &args.program, Vec::new())
        .await
        .context("failed to start the builder sub-agent provider")?;
    let reviewer = spawn_provider(kind, "reviewer", &args.program, Vec::new())
        .await
        .context("failed to start the reviewer sub-agent provider")?;
    let sub_agents = Arc::new(ProviderSubAgentRunner::new(designer, builder, reviewer, args.model.clone()));

    let config = IterationConfig {
        max_iterations: args.max_iterations,
        max_budget_usd: args.max_budget_usd,
        max_duration: args.max_duration_secs.map(Duration::from_secs),
        auto_approve: args.auto_approve,
    };

    let session_id = SessionId::new(uuid::Uuid::new_v4().to_string());
    let checkpoints = CheckpointManager::new(workspace.join("planner"), session_id.clone());
    let change_detector = Arc::new(GitChangeDetector);

    let planner = Planner::new(
        args.mission.clone(),
        work_dir,
        config,
        checkpoints,
        change_detector,
        sub_agents,
    )
    .with_progress_sink(Arc::new(|event: PlannerProgressEvent| match event {
        PlannerProgressEvent::IterationStart { iteration } => {
            eprintln!("[iteration {iteration}] starting");
        }
        PlannerProgressEvent::PhaseChange { phase } => {
            eprintln!("  -> {}", phase.as_str());
        }
        PlannerProgressEvent::IterationAccepted { iteration } => {
            eprintln!("[iteration {iteration}] accepted");
        }
        PlannerProgressEvent::IterationRejectedContinuing { iteration } => {
            eprintln!("[iteration {iteration}] rejected, continuing");
        }
    }));

    planner.start_mission().context("mission rejected before it started")?;

    let design = planner
        .call_designer(1, &args.mission)
        .await
        .context("designer sub-agent failed")?;

    let build_req = BuildRequest { task: args.mission.clone(), feedback: None, design: None };
    let cancel = CancellationToken::new();
    let result = planner.run_iteration_loop(cancel, design, build_req).await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Plain => {
            println!("session:        {session_id}");
            println!("exit reason:    {:?}", result.exit_reason);
            println!("iterations:     {}", result.iteration_count);
            println!("cost (usd):     {:.4}", result.total_cost_usd);
            println!("duration:       {:.1}s", result.total_duration.as_secs_f64());
            if !result.files_created.is_empty() {
                println!("files created:  {}", result.files_created.join(", "));
            }
            if !result.files_modified.is_empty() {
                println!("files modified: {}", result.files_modified.join(", "));
            }
            if let Some(err) = &result.final_error {
                println!("error:          {err}");
            }
        }
    }

    if !result.exit_reason.is_success() {
        anyhow::bail!("mission did not complete successfully: {:?}", result.exit_reason);
    }
    Ok(())
}
