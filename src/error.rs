//! Error taxonomy for the voice session core.
//!
//! Every fatal condition ends up as a status transition plus a log entry;
//! nothing in here is allowed to take the host process down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No capture device, or the device refused to open. Fatal for the
    /// connection attempt.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Malformed inbound audio payload. The offending message is dropped;
    /// the session stays up.
    #[error("audio decode failed: {0}")]
    Decode(String),

    /// The remote session could not be opened.
    #[error("failed to open session: {0}")]
    HandleOpen(String),

    /// The open connection failed mid-session.
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
