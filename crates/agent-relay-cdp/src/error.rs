//! Errors raised while talking to the host.

use thiserror::Error;

/// Inspection-protocol error.
#[derive(Debug, Error)]
pub enum CdpError {
    /// No live session.
    #[error("Not connected to the host")]
    NotConnected,
    /// The session ended before a response arrived.
    #[error("Connection closed")]
    ConnectionClosed,
    /// The host answered with an error payload.
    #[error("Protocol error {code}: {message}")]
    Protocol { code: i64, message: String },
    /// The evaluated script threw.
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
    /// The client-side wait was abandoned; the host may still act on the request.
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Target discovery failed: {0}")]
    Discovery(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CdpError {
    /// Whether the error means the session is gone rather than the call failed.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionClosed | Self::WebSocket(_) | Self::Discovery(_)
        )
    }
}
