//! Wires the `Manager`/`Planner` layers to a concrete provider backend
//! chosen on the command line -- the one place that turns CLI flags into
//! live collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use agmux_manager::{Config, Manager, ProviderFactory};
use agmux_providers::rpc::{RpcLaunchConfig, RpcProvider, RpcTransport};
use agmux_providers::sdk::{SdkLaunchConfig, SdkProvider};
use agmux_providers::LongRunningProvider;

use crate::args::ProviderKindArg;

/// What the CLI needs to build a provider: which backend, which subprocess
/// command, and which args to launch it with.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub kind: ProviderKindArg,
    pub program: String,
    pub args: Vec<String>,
}

/// Builds a fresh `LongRunningProvider` per session. `Oneshot` has no
/// long-running mode (spec §4.1: it completes and exits); a
/// `ProviderFactory` asked to create one rejects it rather than silently
/// downgrading the session's semantics.
pub struct CliProviderFactory {
    spec: ProviderSpec,
}

impl CliProviderFactory {
    pub fn new(spec: ProviderSpec) -> Self {
        Self { spec }
    }
}

impl ProviderFactory for CliProviderFactory {
    fn create(&self, model: &str) -> agmux_manager::Result<Arc<dyn LongRunningProvider>> {
        let name = format!("{}-{}", self.spec.kind.as_str(), model);
        match self.spec.kind {
            ProviderKindArg::Sdk => Ok(Arc::new(SdkProvider::new(
                name,
                SdkLaunchConfig { program: self.spec.program.clone(), args: self.spec.args.clone() },
            ))),
            ProviderKindArg::Rpc => {
                // `RpcProvider` needs an already-spawned transport; the
                // Manager's `ProviderFactory::create` is synchronous, so the
                // transport is spawned with a blocking handle onto the
                // current Tokio runtime (the CLI always runs under
                // `#[tokio::main]`).
                let launch = RpcLaunchConfig {
                    program: self.spec.program.clone(),
                    args: self.spec.args.clone(),
                    work_dir: None,
                };
                let transport = tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(RpcTransport::spawn(launch))
                })?;
                Ok(Arc::new(RpcProvider::new(name, transport)))
            }
            ProviderKindArg::Oneshot => Err(agmux_manager::Error::lifecycle_guard(
                "the oneshot provider backend has no long-running mode; use --provider sdk or --provider rpc for interactive/managed sessions",
            )),
        }
    }
}

/// Resolves the `Manager`'s persistent `Store` root and `toml` config from
/// `--data-dir`/`AGMUX_PATH`/OS data dir/`~/.agmux`, the same priority chain
/// `agmux_manager::resolve_workspace_path` implements.
pub fn load_config(data_dir: Option<&str>) -> Result<(Config, PathBuf)> {
    let workspace = agmux_manager::resolve_workspace_path(data_dir)
        .context("could not resolve agmux workspace path")?;
    let config_path = workspace.join("config.toml");
    let config = Config::load_from(&config_path).context("failed to load config.toml")?;
    Ok((config, workspace))
}

/// Builds a `Manager` backed by a `Store` rooted at the resolved workspace,
/// wired to build providers per `spec`.
pub fn build_manager(spec: ProviderSpec, store_root: PathBuf) -> Arc<Manager> {
    let store = Arc::new(agmux_manager::Store::new(store_root));
    Arc::new(Manager::new(Arc::new(CliProviderFactory::new(spec)), Some(store)))
}
