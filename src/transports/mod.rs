//! Transport implementations for the scoreboard realtime channel.
//!
//! Concrete [`Transport`](crate::Transport) / [`Connector`](crate::Connector)
//! implementations live behind feature gates:
//!
//! | Feature                | Types                                          |
//! |------------------------|------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`], [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), pinpal_sync::SyncError> {
//! use pinpal_sync::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("wss://pinpal.example/scoreboard/42?token=…").await?;
//! ws.send(r#"{"action":"ping","gameId":42}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = ws.recv().await {
//!     println!("server said: {msg}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
