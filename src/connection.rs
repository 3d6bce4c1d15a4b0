//! Connection manager for the scoreboard realtime channel.
//!
//! [`ScoreboardConnection`] is a thin handle that talks to a background
//! connection task over an unbounded MPSC channel. The task owns the
//! transport, redials through a [`Connector`] when the session drops
//! abruptly, and fans every inbound message out through the shared
//! [`Dispatcher`]. Connection status is published on a `watch` channel so
//! any number of observers can follow it.
//!
//! Reconnection policy, after the original client:
//!
//! - a session that ends with a normal closure stays down until an
//!   explicit [`reconnect`](ScoreboardConnection::reconnect) or a fresh
//!   credential arrives;
//! - an abrupt ending triggers automatic redials with linear backoff
//!   (`attempt * base_delay`), up to a bounded number of attempts;
//! - exhausting the attempts parks the connection in
//!   [`ConnectionStatus::Error`] until explicitly revived.
//!
//! The bearer token arrives on a `watch` channel owned by the embedder's
//! auth layer. A rotation tears the session down and redials with the new
//! credential; the token dropping to `None` disconnects.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::protocol::{Action, ClientCommand, RoomId, ServerEvent};
use crate::transport::{Connector, Transport};

/// Default cap on consecutive automatic reconnect attempts.
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base delay between reconnect attempts (scaled linearly).
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(3);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ScoreboardConnection`].
///
/// The only required field is the room id; everything else has defaults
/// matching the production client.
///
/// # Example
///
/// ```
/// use pinpal_sync::connection::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new(42)
///     .with_max_reconnect_attempts(3)
///     .with_reconnect_base_delay(Duration::from_secs(1));
/// assert_eq!(config.room, 42);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Room (live scoring event) to attach to.
    pub room: RoomId,
    /// Consecutive automatic reconnect attempts before giving up.
    ///
    /// Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Base delay between reconnect attempts; attempt `n` waits
    /// `n * base_delay`.
    ///
    /// Defaults to **3 seconds**.
    pub reconnect_base_delay: Duration,
    /// Timeout for the graceful shutdown. When
    /// [`ScoreboardConnection::shutdown`] is called, the background task is
    /// given this much time to close the transport; afterwards it is
    /// aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a configuration for the given room with default values.
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the cap on consecutive automatic reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the base delay between reconnect attempts.
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Lifecycle state of the realtime connection, published on a `watch`
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No session and none being attempted.
    #[default]
    Disconnected,
    /// A dial or redial is in progress (including backoff waits).
    Connecting,
    /// A live session is up.
    Connected,
    /// Automatic reconnection gave up; an explicit
    /// [`reconnect`](ScoreboardConnection::reconnect) or a credential
    /// rotation is required to leave this state.
    Error,
}

/// Commands from the handle to the connection task.
#[derive(Debug)]
enum Command {
    /// Transmit a serialized envelope on the live session.
    Send(String),
    /// Tear the session down and stay down.
    Disconnect,
    /// (Re)establish a session, also from the terminal error state.
    Reconnect,
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to the realtime connection for one room.
///
/// Created via [`ScoreboardConnection::start`], which spawns the background
/// connection task. All methods queue work for the task and return without
/// a round-trip await.
pub struct ScoreboardConnection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    room: RoomId,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl ScoreboardConnection {
    /// Start the connection task and return its handle.
    ///
    /// If `token_rx` currently holds a credential the task dials
    /// immediately; otherwise it waits for one to appear.
    ///
    /// Every inbound message is parsed with [`ServerEvent::parse`] and
    /// delivered through `dispatcher`; consumers registered there outlive
    /// any individual session.
    pub fn start(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
        token_rx: watch::Receiver<Option<String>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let room = config.room;
        let shutdown_timeout = config.shutdown_timeout;

        let task = ConnectionTask {
            connector,
            config,
            cmd_rx,
            token_rx,
            token_alive: true,
            status_tx,
            dispatcher,
            shutdown_rx,
        };
        let task = tokio::spawn(task.run());

        Self {
            cmd_tx,
            status_rx,
            room,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// A `watch` receiver that follows the connection status. Cheap to
    /// clone and hand out.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Send an action with extra envelope fields on the live session.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] when no session is up; the
    /// message is not queued for later.
    pub fn send(&self, action: Action, payload: Value) -> Result<()> {
        self.send_command(ClientCommand::new(action, self.room).with_payload(payload))
    }

    /// Send a fully built [`ClientCommand`] on the live session.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] when no session is up.
    pub fn send_command(&self, command: ClientCommand) -> Result<()> {
        if *self.status_rx.borrow() != ConnectionStatus::Connected {
            return Err(SyncError::NotConnected);
        }
        self.cmd_tx
            .send(Command::Send(command.to_message()))
            .map_err(|_| SyncError::NotConnected)
    }

    /// Tear the session down and stay disconnected until
    /// [`reconnect`](Self::reconnect) or a credential rotation. Calling
    /// this while already disconnected is a no-op.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Ask for a (re)connection, also from the terminal
    /// [`Error`](ConnectionStatus::Error) state.
    pub fn reconnect(&self) {
        let _ = self.cmd_tx.send(Command::Reconnect);
    }

    /// Shut down the connection, closing the transport and stopping the
    /// background task. The task is given the configured shutdown timeout
    /// to exit gracefully, then aborted.
    pub async fn shutdown(&mut self) {
        debug!("ScoreboardConnection: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection task did not exit within timeout; aborting");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection task aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ScoreboardConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreboardConnection")
            .field("room", &self.room)
            .field("status", &self.status())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ScoreboardConnection {
    fn drop(&mut self) {
        // `Drop` is synchronous, so the graceful path (which awaits
        // `transport.close()`) is not an option here. Aborting the task
        // drops the connection loop future immediately.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Connection task ─────────────────────────────────────────────────

/// Why a live session ended.
enum SessionEnd {
    /// Shutdown was requested; exit the task.
    Shutdown,
    /// [`Command::Disconnect`]; go idle without reconnecting.
    Manual,
    /// The server closed the session normally; go idle without
    /// reconnecting.
    CleanClose,
    /// Redial immediately with a fresh attempt budget (credential rotation
    /// or explicit reconnect request).
    Redial,
    /// The session broke; enter the backoff/retry path.
    Failed,
}

/// Outcome of one connect-drive-retry cycle.
enum CycleEnd {
    Shutdown,
    Idle,
}

/// What ended a backoff wait.
enum BackoffEnd {
    /// Delay elapsed (or an explicit reconnect skipped it); retry.
    Proceed,
    /// A fresh credential arrived; retry with the attempt budget reset.
    Fresh,
    /// Disconnect was requested; go idle.
    Cancel,
    Shutdown,
}

/// What woke the task out of the idle (disconnected) state.
enum Trigger {
    Connect,
    Shutdown,
}

struct ConnectionTask {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    token_rx: watch::Receiver<Option<String>>,
    /// Cleared when the token sender is dropped, disabling that select
    /// branch (`changed()` would resolve immediately forever).
    token_alive: bool,
    status_tx: watch::Sender<ConnectionStatus>,
    dispatcher: Arc<Dispatcher>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl ConnectionTask {
    async fn run(mut self) {
        debug!(room = self.config.room, "connection task started");

        let mut should_connect = self.token_rx.borrow_and_update().is_some();
        loop {
            if !should_connect {
                match self.wait_for_trigger().await {
                    Trigger::Connect => should_connect = true,
                    Trigger::Shutdown => break,
                }
                continue;
            }
            match self.run_session_cycle().await {
                CycleEnd::Shutdown => break,
                CycleEnd::Idle => should_connect = false,
            }
        }

        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        debug!("connection task exited");
    }

    /// Wait, while disconnected, for something that warrants dialing.
    async fn wait_for_trigger(&mut self) -> Trigger {
        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => return Trigger::Shutdown,

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Reconnect) => return Trigger::Connect,
                    Some(Command::Disconnect) => {}
                    Some(Command::Send(_)) => {
                        warn!("dropping outgoing message while disconnected");
                    }
                    // Handle dropped.
                    None => return Trigger::Shutdown,
                },

                changed = self.token_rx.changed(), if self.token_alive => match changed {
                    Ok(()) => {
                        if self.token_rx.borrow_and_update().is_some() {
                            debug!("credential available, connecting");
                            return Trigger::Connect;
                        }
                    }
                    Err(_) => self.token_alive = false,
                },
            }
        }
    }

    /// Dial, drive the session, and retry with backoff until the cycle
    /// ends in shutdown or idleness.
    async fn run_session_cycle(&mut self) -> CycleEnd {
        let mut attempt: u32 = 0;
        loop {
            let Some(token) = self.token_rx.borrow_and_update().clone() else {
                warn!("no credential available, staying disconnected");
                self.status_tx.send_replace(ConnectionStatus::Disconnected);
                return CycleEnd::Idle;
            };

            self.status_tx.send_replace(ConnectionStatus::Connecting);
            match self.connector.connect(self.config.room, &token).await {
                Ok(mut transport) => {
                    info!(room = self.config.room, "realtime session established");
                    self.status_tx.send_replace(ConnectionStatus::Connected);
                    attempt = 0;

                    match self.drive(transport.as_mut()).await {
                        SessionEnd::Shutdown => {
                            let _ = transport.close().await;
                            return CycleEnd::Shutdown;
                        }
                        SessionEnd::Manual => {
                            let _ = transport.close().await;
                            self.status_tx.send_replace(ConnectionStatus::Disconnected);
                            return CycleEnd::Idle;
                        }
                        SessionEnd::CleanClose => {
                            debug!("session closed normally, not reconnecting");
                            self.status_tx.send_replace(ConnectionStatus::Disconnected);
                            return CycleEnd::Idle;
                        }
                        SessionEnd::Redial => {
                            let _ = transport.close().await;
                            continue;
                        }
                        SessionEnd::Failed => {
                            let _ = transport.close().await;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "connection attempt failed");
                }
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                error!(
                    attempts = self.config.max_reconnect_attempts,
                    "reconnect attempts exhausted"
                );
                self.status_tx.send_replace(ConnectionStatus::Error);
                return CycleEnd::Idle;
            }

            let delay = self.config.reconnect_base_delay * attempt;
            debug!(attempt, ?delay, "scheduling reconnect");
            match self.backoff(delay).await {
                BackoffEnd::Proceed => {}
                BackoffEnd::Fresh => attempt = 0,
                BackoffEnd::Cancel => {
                    self.status_tx.send_replace(ConnectionStatus::Disconnected);
                    return CycleEnd::Idle;
                }
                BackoffEnd::Shutdown => return CycleEnd::Shutdown,
            }
        }
    }

    /// Sleep out a reconnect delay while staying responsive to commands
    /// and credential changes.
    async fn backoff(&mut self, delay: Duration) -> BackoffEnd {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return BackoffEnd::Proceed,

                _ = &mut self.shutdown_rx => return BackoffEnd::Shutdown,

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Disconnect) => return BackoffEnd::Cancel,
                    // Explicit request skips the remaining delay.
                    Some(Command::Reconnect) => return BackoffEnd::Proceed,
                    Some(Command::Send(_)) => {
                        warn!("dropping outgoing message while reconnecting");
                    }
                    None => return BackoffEnd::Shutdown,
                },

                changed = self.token_rx.changed(), if self.token_alive => match changed {
                    Ok(()) => return BackoffEnd::Fresh,
                    Err(_) => self.token_alive = false,
                },
            }
        }
    }

    /// Drive one live session until it ends.
    async fn drive(&mut self, transport: &mut dyn Transport) -> SessionEnd {
        // Fresh session: subscribe to the room topic and pull the full
        // state exactly once per open.
        if let Err(e) = self.send_envelope(transport, Action::Subscribe).await {
            warn!(error = %e, "failed to subscribe on fresh session");
            return SessionEnd::Failed;
        }
        if let Err(e) = self
            .send_envelope(transport, Action::RequestInitialData)
            .await
        {
            warn!(error = %e, "failed to request initial data");
            return SessionEnd::Failed;
        }

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => return SessionEnd::Shutdown,

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => {
                        if let Err(e) = transport.send(msg).await {
                            error!(error = %e, "transport send error");
                            return SessionEnd::Failed;
                        }
                    }
                    Some(Command::Disconnect) => return SessionEnd::Manual,
                    Some(Command::Reconnect) => return SessionEnd::Redial,
                    None => return SessionEnd::Shutdown,
                },

                changed = self.token_rx.changed(), if self.token_alive => match changed {
                    Ok(()) => {
                        return if self.token_rx.borrow_and_update().is_some() {
                            debug!("credential rotated, rebuilding session");
                            SessionEnd::Redial
                        } else {
                            debug!("credential cleared, disconnecting");
                            SessionEnd::Manual
                        };
                    }
                    Err(_) => self.token_alive = false,
                },

                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => {
                        let event = ServerEvent::parse(&text);
                        // A score-counting flip invalidates every row;
                        // re-pull the snapshot instead of patching.
                        let refresh =
                            matches!(event, ServerEvent::ScoreCountingUpdated { .. });
                        self.dispatcher.dispatch(&event);
                        if refresh {
                            if let Err(e) = self
                                .send_envelope(transport, Action::RequestInitialData)
                                .await
                            {
                                warn!(error = %e, "failed to refresh after score-counting change");
                                return SessionEnd::Failed;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "transport receive error");
                        return SessionEnd::Failed;
                    }
                    None => return SessionEnd::CleanClose,
                },
            }
        }
    }

    async fn send_envelope(&self, transport: &mut dyn Transport, action: Action) -> Result<()> {
        transport
            .send(ClientCommand::new(action, self.config.room).to_message())
            .await
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ConnectionConfig::new(7);
        assert_eq!(config.room, 7);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(3));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builder_methods() {
        let config = ConnectionConfig::new(7)
            .with_max_reconnect_attempts(2)
            .with_reconnect_base_delay(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn status_default_is_disconnected() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }
}
