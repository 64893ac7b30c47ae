use std::fmt;

/// Result type for agmux-planner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the Planner layer (spec §7: "the Planner layer
/// surfaces sub-agent errors via the iteration loop and records them in the
/// checkpoint").
#[derive(Debug)]
pub enum Error {
    /// `Transition`/`call_*` rejected by the state machine's transition
    /// table (spec §4.7.1: "any other transition is rejected with an
    /// error").
    InvalidTransition { from: crate::state::PlannerState, to: crate::state::PlannerState },
    /// A `call_*` was attempted past `IterationConfig::max_iterations`.
    IterationLimitExceeded { iteration: u32, max: u32 },
    /// A sub-agent (designer/builder/reviewer) failed.
    SubAgent(String),
    /// The git-diff change detector failed to run or parse.
    ChangeDetector(String),
    /// The operation was cancelled (spec §4.7.2 step 3/4: "distinguish
    /// context cancellation ... from any other").
    Cancelled,
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTransition { from, to } => {
                write!(f, "invalid planner transition: {from:?} -> {to:?}")
            }
            Error::IterationLimitExceeded { iteration, max } => {
                write!(f, "iteration {iteration} exceeds max_iterations {max}")
            }
            Error::SubAgent(msg) => write!(f, "sub-agent error: {msg}"),
            Error::ChangeDetector(msg) => write!(f, "change detector error: {msg}"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::Json(err) => write!(f, "JSON error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<agmux_providers::Error> for Error {
    fn from(err: agmux_providers::Error) -> Self {
        match err {
            agmux_providers::Error::Cancelled => Error::Cancelled,
            other => Error::SubAgent(other.to_string()),
        }
    }
}
