//! Testing infrastructure shared across the agmux workspace's test suites.
//!
//! `providers` supplies scripted mock `Provider` implementations (no real
//! subprocess), `fixtures` builds sample session/output data, `assertions`
//! are custom checks for agmux-specific invariants.

pub mod assertions;
pub mod fixtures;
pub mod providers;

pub use providers::{ScriptedEvent, ScriptedProvider};
