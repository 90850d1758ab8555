use std::fmt;

/// Connection lifecycle state. Exactly one value is live at a time and the
/// transition table in the session manager is the only way it changes; every
/// transition is pushed to the host integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Listening,
    Speaking,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Speaking => write!(f, "speaking"),
            SessionState::Error => write!(f, "error"),
        }
    }
}
