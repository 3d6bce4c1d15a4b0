//! # PinPal Sync
//!
//! Realtime synchronization client for the PinPal live bowling scoreboard.
//!
//! Keeps a club-night scoreboard consistent across every phone and tablet
//! in the room: scores, grades, team assignments, side-pot opt-ins, and the
//! card draw all update live as operators enter them.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any
//!   backend; a [`Connector`] redials it across reconnects
//! - **WebSocket built-in** — default `transport-websocket` feature provides
//!   [`WebSocketTransport`] / [`WebSocketConnector`]
//! - **Self-healing** — bounded automatic reconnection with linear backoff,
//!   credential rotation without restart
//! - **Duplicate-safe** — the [`DedupGate`] keeps jittery UIs from firing
//!   the same mutation twice
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pinpal_sync::{
//!     ConnectionConfig, Dispatcher, ScoreboardConnection, ScoreboardStore,
//!     ServerEvent, WebSocketConnector,
//! };
//!
//! let (token_tx, token_rx) = tokio::sync::watch::channel(Some("jwt".to_owned()));
//! let store = Arc::new(ScoreboardStore::new());
//! let dispatcher = Arc::new(Dispatcher::new());
//!
//! let store2 = Arc::clone(&store);
//! dispatcher.add_consumer(move |event: &ServerEvent| store2.apply(event));
//!
//! let connection = ScoreboardConnection::start(
//!     Arc::new(WebSocketConnector::new("wss://pinpal.example")),
//!     ConnectionConfig::new(42),
//!     token_rx,
//!     dispatcher,
//! );
//! ```

pub mod commands;
pub mod connection;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use commands::{CommandClient, CommandResponse};
pub use connection::{ConnectionConfig, ConnectionStatus, ScoreboardConnection};
pub use dedup::{Admission, CommandSpec, DedupConfig, DedupGate};
pub use dispatch::{ConsumerId, Dispatcher};
pub use error::SyncError;
pub use protocol::{Action, ClientCommand, Participant, ParticipantId, RoomId, ServerEvent};
pub use store::{Modal, ScoreboardStore};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::{WebSocketConnector, WebSocketTransport};
