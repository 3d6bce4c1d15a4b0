//! Error types for the scoreboard synchronization client.

use thiserror::Error;

/// Errors that can occur when using the synchronization client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active session, but the
    /// connection is not in the `connected` state.
    #[error("not connected to server")]
    NotConnected,

    /// No bearer token is available to authenticate the session.
    #[error("no credential available")]
    MissingCredentials,

    /// An HTTP command failed at the network or protocol level.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for synchronization client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
