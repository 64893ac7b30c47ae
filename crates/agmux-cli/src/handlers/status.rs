//! `agmux status <session-id>`: look up a session's lifecycle status and
//! progress snapshot from the persistent `Store`, with no provider or
//! Manager wiring required -- a read-only query over what was already
//! saved (spec §4.6.1 "Persistent Store").

use anyhow::{Context, Result};

use agmux_manager::Store;
use agmux_types::SessionId;

use crate::args::{OutputFormat, StatusArgs};

pub async fn handle(args: StatusArgs, workspace: &std::path::Path, format: OutputFormat) -> Result<()> {
    let store = Store::new(workspace.join("sessions"));
    let id = SessionId::new(args.session_id.clone());

    let (repo_name, worktree_name) = locate(&store, &id)
        .await
        .with_context(|| format!("no stored session found with id {id}"))?;
    let stored = store
        .load_session(&repo_name, &worktree_name, &id)
        .await
        .context("failed to load session from the store")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stored.session)?);
        }
        OutputFormat::Plain => {
            let s = &stored.session;
            println!("id:         {}", s.id);
            println!("title:      {}", s.title);
            println!("status:     {:?}", s.status);
            println!("model:      {}", s.model);
            println!("repo:       {}", s.repo_name);
            println!("worktree:   {}", s.worktree_name);
            println!("turns:      {}", s.progress.turn_count);
            println!("cost (usd): {:.4}", s.progress.total_cost_usd);
            if let Some(err) = &s.error_msg {
                println!("error:      {err}");
            }
            println!("output:     {} line(s)", stored.output.len());
        }
    }
    Ok(())
}

/// The Store indexes by `(repo_name, worktree_name, session_id)`, so a
/// bare session id first needs its owning repo/worktree found by scanning
/// every stored session -- acceptable for a CLI query, not a hot path.
async fn locate(store: &Store, id: &SessionId) -> Result<(String, String)> {
    store
        .list_all_sessions()
        .await?
        .into_iter()
        .find(|s| &s.id == id)
        .map(|s| (s.repo_name, s.worktree_name))
        .ok_or_else(|| anyhow::anyhow!("session {id} not found in any repo/worktree under the store"))
}
