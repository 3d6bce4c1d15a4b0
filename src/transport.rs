//! Transport abstraction for the scoreboard realtime channel.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and server. The realtime protocol uses JSON text
//! messages, so every transport implementation must handle message framing
//! internally (e.g., WebSocket frames, length-prefixed TCP).
//!
//! Because the connection manager rebuilds its session on reconnect and on
//! credential rotation, connection setup lives behind its own seam: a
//! [`Connector`] dials a `(room, token)` pair and yields a fresh boxed
//! transport. The bearer token travels as a connection parameter, not a
//! header — the browser WebSocket API this protocol grew up with cannot set
//! headers, and the server still authenticates that way.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::protocol::RoomId;

/// A bidirectional text message transport for one realtime session.
///
/// Implementors shuttle serialized JSON strings between client and server.
/// Each call to [`send`](Transport::send) transmits one complete message,
/// each call to [`recv`](Transport::recv) yields one.
///
/// # Close semantics
///
/// `recv` returning `None` means the connection ended with a normal closure
/// (deliberate shutdown on either side); `Some(Err(_))` means it ended
/// abruptly. The connection manager reconnects only after abrupt endings.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it
/// is used inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the message could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), SyncError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — the connection failed abruptly
    /// - `None` — the connection was closed cleanly
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the transport with a normal closure.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Dials a fresh session for a room, authenticated with the given token.
///
/// The connection manager calls this once per connection attempt: on
/// startup, on every reconnect, and after a credential rotation. A single
/// `Connector` instance therefore outlives many transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connected transport for `room`, authenticating with
    /// `token` as a connection parameter.
    ///
    /// # Errors
    ///
    /// Any [`SyncError`] from the underlying dial; the connection manager
    /// treats a failure here like an abrupt close and applies its backoff
    /// policy.
    async fn connect(&self, room: RoomId, token: &str) -> Result<Box<dyn Transport>, SyncError>;
}
