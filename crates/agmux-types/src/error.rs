use std::fmt;

/// Result type for agmux-types operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the workspace (spec §7).
///
/// Variants 3 (tool-result error), 6 (iteration-loop termination) and 7
/// (cancellation) from the §7 taxonomy are deliberately *not* error
/// variants here: they are recorded on `OutputLine`/`ExitReason` instead,
/// since they are non-fatal outcomes rather than failures. Only the
/// categories that a caller must actually handle as an error are
/// represented as `Error` variants.
#[derive(Debug)]
pub enum Error {
    /// Transport failure: subprocess exited, pipe broke, stream failed to decode.
    Transport(String),
    /// Protocol violation: envelope unparseable, unknown subtype. Usually
    /// dropped silently at the envelope layer rather than surfaced, but kept
    /// as a variant for the rare caller that needs to report one explicitly.
    Protocol(String),
    /// A lifecycle guard rejected the requested transition or operation
    /// (e.g. `UpdateStatus` from a terminal status, `SendFollowUp` when not
    /// idle, delete while running). The message always names the guard that
    /// fired so callers/tests can match on substrings (e.g. "terminal").
    LifecycleGuard(String),
    /// The operation was cancelled via its context/cancellation token. Not a
    /// failure in the usual sense; kept distinct from `Transport` so callers
    /// can tell "the caller asked us to stop" apart from "something broke".
    Cancelled,
    /// Underlying IO failure (file read/write, subprocess spawn).
    Io(std::io::Error),
    /// Configuration error (bad path, malformed config file).
    Config(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn lifecycle_guard(msg: impl Into<String>) -> Self {
        Error::LifecycleGuard(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::LifecycleGuard(msg) => write!(f, "{}", msg),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_guard_message_contains_terminal() {
        let err = Error::lifecycle_guard("cannot transition: session is in a terminal status");
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn cancelled_is_distinguishable() {
        let err = Error::Cancelled;
        assert!(err.is_cancelled());
        assert!(!Error::transport("boom").is_cancelled());
    }
}
