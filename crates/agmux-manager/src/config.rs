//! `toml`-backed configuration (spec §2-EXPANDED). Resolution order:
//! explicit path → `AGMUX_PATH` env var → OS data dir → `~/.agmux`
//! fallback.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Resolves the workspace data directory used for the Store root and
/// default config file, in priority order.
pub fn resolve_workspace_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("AGMUX_PATH") {
        return Ok(expand_tilde(&env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("agmux"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".agmux"));
    }

    Err(Error::Store(
        "could not determine workspace path: no HOME directory or XDG data directory found"
            .to_string(),
    ))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub binary_path: Option<PathBuf>,
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_model() -> String {
    "sonnet".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_path: None,
            default_model: default_model(),
        }
    }
}

/// Planner defaults (spec §4.7 `IterationConfig`), configurable so an
/// operator doesn't need to recompile to change the guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerDefaults {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub max_budget_usd: f64,
    #[serde(default)]
    pub max_duration_secs: u64,
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_max_iterations() -> u32 {
    10
}

impl Default for PlannerDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_budget_usd: 0.0,
            max_duration_secs: 0,
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub planner: PlannerDefaults,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Store(format!("malformed config: {e}")))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Store(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)?.join("config.toml"))
    }

    pub fn store_root(&self) -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)?.join("sessions"))
    }
}
