//! Error types for the classroom core.

use thiserror::Error;

use crate::media::MediaAccessError;

/// Result type alias for classroom operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the classroom core
#[derive(Debug, Error)]
pub enum Error {
    /// Local media acquisition failed; fatal for a join
    #[error("Media access error: {0}")]
    MediaAccess(#[from] MediaAccessError),

    /// Could not reach the signaling relay within the retry budget
    #[error("Signaling connect failed after {attempts} attempt(s) to {url}: {reason}")]
    TransportConnect {
        /// Relay URL that was dialed
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// Last underlying failure
        reason: String,
    },

    /// Transport-level failure after the connection was established
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected signaling traffic
    #[error("Signaling protocol error: {0}")]
    Protocol(String),

    /// Peer connection / SDP / ICE failure
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Room directory lookup failed (callers treat this as best effort)
    #[error("Room directory error: {0}")]
    Directory(String),

    /// The session was closed while an operation was in flight
    #[error("Session closed")]
    SessionClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
