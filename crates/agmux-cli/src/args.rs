//! Command-line surface: a `Parser` with global flags and an
//! `Option<Commands>`, a `Subcommand` enum per top-level verb, `ValueEnum`
//! output/log formats with a manual `Display` impl for each (spec
//! §6-EXPANDED: "a minimal `agmux-cli` binary crate implements it -- `run
//! <mission>`, `interactive`, `status <session-id>`"). Three verbs: the
//! planner/manager surface this crate fronts is narrow by design.

use std::fmt;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// The three backend kinds named abstractly in spec §1/§4.1, exposed here
/// as a clap-friendly enum so `agmux_providers::ProviderKind` doesn't need
/// to derive `ValueEnum` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ProviderKindArg {
    Sdk,
    Rpc,
    Oneshot,
}

impl ProviderKindArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKindArg::Sdk => "sdk",
            ProviderKindArg::Rpc => "rpc",
            ProviderKindArg::Oneshot => "oneshot",
        }
    }
}

impl fmt::Display for ProviderKindArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Parser)]
#[command(name = "agmux")]
#[command(about = "Orchestrate AI coding assistant subprocesses behind a uniform provider, session, and planner model", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Workspace data directory. Falls back to `AGMUX_PATH`, then an OS data
    /// dir, then `~/.agmux` (spec §2-EXPANDED).
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[arg(long, default_value = "plain", global = true)]
    pub format: OutputFormat,

    #[arg(long, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a planner mission to completion (design -> build -> review,
    /// looping until accepted or a guard trips).
    #[command(about = "Run a planner mission end-to-end")]
    Run(RunArgs),

    /// A plain line-oriented REPL against a single long-running provider
    /// session -- not a TUI (spec §6-EXPANDED: "no ratatui dashboard, no
    /// crossterm raw-mode input loop").
    #[command(about = "Start an interactive line-oriented session")]
    Interactive(InteractiveArgs),

    /// Look up a previously started session's lifecycle status and
    /// progress snapshot.
    #[command(about = "Show a session's status")]
    Status(StatusArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// The mission statement handed to the designer sub-agent.
    pub mission: String,

    /// Directory the builder/reviewer sub-agents operate in. Defaults to
    /// the current directory.
    #[arg(long)]
    pub work_dir: Option<String>,

    #[arg(long, default_value = "sdk")]
    pub provider: ProviderKindArg,

    /// Subprocess command for each sub-agent provider, e.g. `claude`.
    #[arg(long, default_value = "claude")]
    pub program: String,

    #[arg(long, default_value = "sonnet")]
    pub model: String,

    #[arg(long)]
    pub max_iterations: Option<u32>,

    #[arg(long)]
    pub max_budget_usd: Option<f64>,

    #[arg(long)]
    pub max_duration_secs: Option<u64>,

    /// Skip the reviewer's approval gate and accept on the first pass with
    /// no critical issues raised (spec §4.7 `IterationConfig.auto_approve`).
    #[arg(long)]
    pub auto_approve: bool,
}

#[derive(Debug, clap::Args)]
pub struct InteractiveArgs {
    #[arg(long, default_value = "sdk")]
    pub provider: ProviderKindArg,

    #[arg(long, default_value = "claude")]
    pub program: String,

    #[arg(long, default_value = "sonnet")]
    pub model: String,

    #[arg(long)]
    pub work_dir: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct StatusArgs {
    pub session_id: String,
}
