//! Error types for the routing core.

use thiserror::Error;

/// Errors raised while driving a session.
///
/// Every variant terminates only the session that produced it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The transport failed or reported an error frame
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be decoded
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session's own outbound channel is gone
    #[error("Outbound channel closed")]
    OutboundClosed,
}

impl RelayError {
    /// Create a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
