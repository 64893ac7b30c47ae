//! The boundary CLI (spec §6-EXPANDED): `run`, `interactive`, `status`,
//! thin wiring over `agmux-manager` and `agmux-planner`. No TUI, no MCP
//! server -- those are out of scope (spec §1/§9).

mod args;
mod commands;
mod context;
mod handlers;

pub use args::{Cli, Commands, LogLevel, OutputFormat};
pub use commands::run;
