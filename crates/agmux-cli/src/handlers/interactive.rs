//! `agmux interactive`: a plain line-oriented REPL over one managed session
//! (spec §6-EXPANDED: "a plain line-oriented REPL, not a TUI"). Each line
//! typed becomes a follow-up message (spec §4.6 "Interaction", allowed only
//! once the session is idle); session output streams to stdout from a
//! background task subscribed to the Manager's event fan-out.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use agmux_manager::{Config, Manager, RunnerKind, SessionType};
use agmux_session::SessionEvent;
use agmux_types::{OutputLineType, SessionId, SessionStatus};

use crate::args::InteractiveArgs;
use crate::context::{self, ProviderSpec};

const IDLE_WAIT: Duration = Duration::from_secs(30);

pub async fn handle(args: InteractiveArgs, _config: &Config, workspace: &std::path::Path) -> Result<()> {
    let work_dir = match args.work_dir {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().context("could not determine current directory")?,
    };

    let spec = ProviderSpec { kind: args.provider, program: args.program.clone(), args: Vec::new() };
    let manager = context::build_manager(spec, workspace.join("sessions"));

    let id = manager
        .start_session(
            SessionType::Builder,
            "interactive",
            work_dir.clone(),
            work_dir.display().to_string(),
            "interactive session",
            args.model.clone(),
            RunnerKind::Tui,
        )
        .await
        .context("failed to start interactive session")?;

    println!("session {id} started in {}", work_dir.display());
    println!("type a message and press enter; `exit` or `quit` ends the session");

    spawn_output_forwarder(manager.clone(), id.clone());
    wait_for_idle(&manager, &id).await;

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if let Err(err) = manager.send_follow_up(&id, line).await {
            eprintln!("error: {err}");
            continue;
        }
        wait_for_idle(&manager, &id).await;
    }

    manager.stop_session(&id).await.context("failed to stop session")?;
    println!("session {id} stopped");
    Ok(())
}

/// Prints streamed text/tool lines as they arrive. `OutputAppended` carries
/// no payload of its own (spec §4.4: the Model is the single source of
/// truth for the transcript), so each notification re-reads the output
/// buffer and prints whatever is new since the last line this task printed.
fn spawn_output_forwarder(manager: Arc<Manager>, id: SessionId) {
    tokio::spawn(async move {
        let mut events = manager.events();
        let mut printed = 0usize;
        loop {
            match events.recv().await {
                Ok(evt) if evt.session_id == id && matches!(evt.event, SessionEvent::OutputAppended) => {
                    let Ok(lines) = manager.get_session_output(&id).await else { continue };
                    for line in lines.iter().skip(printed) {
                        if matches!(line.line_type, OutputLineType::Text | OutputLineType::ToolStart) {
                            println!("{}", line.content);
                        }
                    }
                    printed = lines.len();
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Polls the session's status until it reports idle or `IDLE_WAIT` elapses
/// -- best-effort, since the exact moment a backend finishes its
/// already-in-flight turn isn't observable any other way from the CLI
/// boundary (the boundary CLI's own interaction loop is supplemental to the
/// core spec; see DESIGN.md).
async fn wait_for_idle(manager: &Manager, id: &SessionId) {
    let deadline = tokio::time::Instant::now() + IDLE_WAIT;
    loop {
        match manager.get_session(id).await {
            Ok(session) if session.status == SessionStatus::Idle => return,
            Ok(session) if session.status.is_terminal() => return,
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
