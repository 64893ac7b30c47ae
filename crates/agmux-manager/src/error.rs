use std::fmt;

/// Result type for agmux-manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the Session Manager layer (spec §7: "the Manager
/// layer surfaces lifecycle-guard violations").
#[derive(Debug)]
pub enum Error {
    /// A lifecycle guard rejected the requested operation (e.g. follow-up
    /// while not idle, delete while running, tmux runner with no tmux).
    LifecycleGuard(String),
    /// The session id is not known to this Manager.
    NotFound(String),
    /// Underlying Provider/bridge failure.
    Provider(agmux_providers::Error),
    /// Persistent Store failure (IO, malformed JSON, invalid path component).
    Store(String),
    Io(std::io::Error),
}

impl Error {
    pub fn lifecycle_guard(msg: impl Into<String>) -> Self {
        Error::LifecycleGuard(msg.into())
    }

    pub fn not_found(id: impl fmt::Display) -> Self {
        Error::NotFound(id.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LifecycleGuard(msg) => write!(f, "{}", msg),
            Error::NotFound(id) => write!(f, "session not found: {}", id),
            Error::Provider(err) => write!(f, "provider error: {}", err),
            Error::Store(msg) => write!(f, "store error: {}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Provider(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<agmux_providers::Error> for Error {
    fn from(err: agmux_providers::Error) -> Self {
        Error::Provider(err)
    }
}

impl From<agmux_types::Error> for Error {
    fn from(err: agmux_types::Error) -> Self {
        Error::LifecycleGuard(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(format!("malformed session JSON: {err}"))
    }
}
