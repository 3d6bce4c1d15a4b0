//! End-to-end tests for the connection manager over scripted transports.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pinpal_sync::connection::{ConnectionConfig, ConnectionStatus, ScoreboardConnection};
use pinpal_sync::dispatch::Dispatcher;
use pinpal_sync::error::SyncError;
use pinpal_sync::protocol::{Action, RoomId, ServerEvent};
use pinpal_sync::store::ScoreboardStore;
use pinpal_sync::transport::{Connector, Transport};
use serde_json::{json, Value};
use tokio::sync::watch;

type Frame = Option<Result<String, SyncError>>;

// ── Scripted transport ──────────────────────────────────────────────

/// Replays scripted frames; once the script runs out, `recv` hangs so the
/// session stays alive until torn down from outside.
struct MockTransport {
    incoming: VecDeque<Frame>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        if let Some(frame) = self.incoming.pop_front() {
            // An explicit `None` frame is a clean close.
            frame
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// What one dial attempt should produce.
enum Script {
    /// The dial itself fails.
    Fail,
    /// The dial succeeds and the transport replays these frames.
    Session(Vec<Frame>),
}

/// Hands out one scripted session per dial, recording every dial and every
/// message sent across all sessions.
struct MockConnector {
    scripts: Mutex<VecDeque<Script>>,
    /// Behavior once the scripts run out: fail the dial, or hand out an
    /// empty (hanging) session.
    fallback_fails: bool,
    dials: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            fallback_fails: false,
            dials: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback_fails: true,
            dials: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    fn refused() -> SyncError {
        SyncError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _room: RoomId, token: &str) -> Result<Box<dyn Transport>, SyncError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_owned());

        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Fail) => Err(Self::refused()),
            Some(Script::Session(frames)) => Ok(Box::new(MockTransport {
                incoming: frames.into(),
                sent: Arc::clone(&self.sent),
            })),
            None if self.fallback_fails => Err(Self::refused()),
            None => Ok(Box::new(MockTransport {
                incoming: VecDeque::new(),
                sent: Arc::clone(&self.sent),
            })),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_config() -> ConnectionConfig {
    ConnectionConfig::new(42).with_reconnect_base_delay(Duration::from_millis(10))
}

fn start(
    connector: Arc<MockConnector>,
    token: Option<&str>,
) -> (
    ScoreboardConnection,
    watch::Sender<Option<String>>,
    Arc<Dispatcher>,
) {
    let (token_tx, token_rx) = watch::channel(token.map(str::to_owned));
    let dispatcher = Arc::new(Dispatcher::new());
    let connection = ScoreboardConnection::start(
        connector,
        fast_config(),
        token_rx,
        Arc::clone(&dispatcher),
    );
    (connection, token_tx, dispatcher)
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn action_of(message: &str) -> String {
    let value: Value = serde_json::from_str(message).unwrap();
    value["action"].as_str().unwrap().to_owned()
}

fn abrupt_error() -> Frame {
    Some(Err(SyncError::TransportReceive("connection reset".into())))
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_session_subscribes_then_requests_initial_data() {
    let connector = MockConnector::new(vec![Script::Session(vec![])]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("handshake sent", || connector.sent().len() >= 2).await;

    let sent = connector.sent();
    assert_eq!(action_of(&sent[0]), "subscribe");
    assert_eq!(action_of(&sent[1]), "initialData");
    let envelope: Value = serde_json::from_str(&sent[1]).unwrap();
    assert_eq!(envelope["gameId"], 42);
    assert_eq!(connection.status(), ConnectionStatus::Connected);

    connection.shutdown().await;
}

#[tokio::test]
async fn initial_data_requested_once_per_session_across_reconnects() {
    let connector = MockConnector::new(vec![
        Script::Session(vec![abrupt_error()]),
        Script::Session(vec![abrupt_error()]),
        Script::Session(vec![]),
    ]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("three sessions established", || {
        connector.dials() == 3 && connector.sent().len() >= 6
    })
    .await;

    let actions: Vec<String> = connector.sent().iter().map(|m| action_of(m)).collect();
    assert_eq!(
        actions,
        vec![
            "subscribe",
            "initialData",
            "subscribe",
            "initialData",
            "subscribe",
            "initialData"
        ]
    );

    connection.shutdown().await;
}

#[tokio::test]
async fn clean_close_does_not_reconnect() {
    let connector = MockConnector::new(vec![Script::Session(vec![None])]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    let mut status = connection.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .unwrap();

    // Give a would-be redial every chance to happen.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.dials(), 1);

    connection.shutdown().await;
}

#[tokio::test]
async fn abrupt_close_triggers_reconnect() {
    let connector = MockConnector::new(vec![
        Script::Session(vec![abrupt_error()]),
        Script::Session(vec![]),
    ]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("redial after abrupt close", || connector.dials() == 2).await;
    wait_until("second session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    connection.shutdown().await;
}

#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let connector = MockConnector::failing();
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    let mut status = connection.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Error)
        .await
        .unwrap();

    // One initial dial plus five retries.
    assert_eq!(connector.dials(), 6);

    // No further dialing happens on its own.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.dials(), 6);

    connection.shutdown().await;
}

#[tokio::test]
async fn explicit_reconnect_revives_from_error_state() {
    let connector = MockConnector::failing();
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    let mut status = connection.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Error)
        .await
        .unwrap();

    connection.reconnect();
    wait_until("dialing resumes", || connector.dials() >= 7).await;

    connection.shutdown().await;
}

#[tokio::test]
async fn send_requires_live_session() {
    let connector = MockConnector::new(vec![]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), None);

    let result = connection.send(Action::Ping, json!({}));
    assert!(matches!(result, Err(SyncError::NotConnected)));
    assert_eq!(connector.dials(), 0);

    connection.shutdown().await;
}

#[tokio::test]
async fn send_reaches_the_transport() {
    let connector = MockConnector::new(vec![Script::Session(vec![])]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    connection
        .send(Action::UpdateScore, json!({ "userId": 7, "game1Score": 200 }))
        .unwrap();

    wait_until("command transmitted", || connector.sent().len() >= 3).await;
    let sent = connector.sent();
    let envelope: Value = serde_json::from_str(&sent[2]).unwrap();
    assert_eq!(envelope["action"], "updateScore");
    assert_eq!(envelope["userId"], 7);

    connection.shutdown().await;
}

#[tokio::test]
async fn token_rotation_rebuilds_the_session() {
    let connector = MockConnector::new(vec![Script::Session(vec![]), Script::Session(vec![])]);
    let (mut connection, token_tx, _) = start(Arc::clone(&connector), Some("tok-1"));

    wait_until("first session up", || connector.dials() == 1).await;

    token_tx.send(Some("tok-2".to_owned())).unwrap();

    wait_until("redial with new credential", || connector.dials() == 2).await;
    assert_eq!(connector.tokens(), vec!["tok-1", "tok-2"]);
    wait_until("second session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    connection.shutdown().await;
}

#[tokio::test]
async fn clearing_the_token_disconnects() {
    let connector = MockConnector::new(vec![Script::Session(vec![])]);
    let (mut connection, token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    token_tx.send(None).unwrap();

    let mut status = connection.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.dials(), 1);

    connection.shutdown().await;
}

#[tokio::test]
async fn inbound_frames_reach_consumers_and_the_store() {
    let connector = MockConnector::new(vec![Script::Session(vec![
        Some(Ok(r#"[{"memberId":1,"memberName":"Kim"}]"#.to_owned())),
        Some(Ok("not json".to_owned())),
    ])]);

    let (token_tx, token_rx) = watch::channel(Some("tok".to_owned()));
    let dispatcher = Arc::new(Dispatcher::new());
    let store = Arc::new(ScoreboardStore::new());
    let raws = Arc::new(Mutex::new(Vec::new()));

    let store2 = Arc::clone(&store);
    dispatcher.add_consumer(move |event: &ServerEvent| store2.apply(event));
    let raws2 = Arc::clone(&raws);
    dispatcher.add_consumer(move |event: &ServerEvent| {
        if let ServerEvent::Raw(text) = event {
            raws2.lock().unwrap().push(text.clone());
        }
    });

    let mut connection = ScoreboardConnection::start(
        Arc::clone(&connector) as Arc<dyn Connector>,
        fast_config(),
        token_rx,
        dispatcher,
    );

    wait_until("snapshot applied", || store.len() == 1).await;
    wait_until("raw frame delivered", || !raws.lock().unwrap().is_empty()).await;
    assert_eq!(store.participant(1).unwrap().member_name, "Kim");
    assert_eq!(raws.lock().unwrap()[0], "not json");

    drop(token_tx);
    connection.shutdown().await;
}

#[tokio::test]
async fn score_counting_change_triggers_snapshot_refresh() {
    let connector = MockConnector::new(vec![Script::Session(vec![Some(Ok(
        r#"{"type":"scoreCountingUpdated","scoreCounting":true}"#.to_owned(),
    ))])]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("refresh requested", || connector.sent().len() >= 3).await;
    assert_eq!(action_of(&connector.sent()[2]), "initialData");

    connection.shutdown().await;
}

#[tokio::test]
async fn disconnect_then_reconnect() {
    let connector = MockConnector::new(vec![Script::Session(vec![]), Script::Session(vec![])]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    connection.disconnect();
    let mut status = connection.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .unwrap();

    // Manual disconnect must not redial on its own.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.dials(), 1);

    connection.reconnect();
    wait_until("redial on request", || connector.dials() == 2).await;
    wait_until("session back up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    connection.shutdown().await;
}

#[tokio::test]
async fn double_disconnect_is_a_noop() {
    let connector = MockConnector::new(vec![Script::Session(vec![])]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    connection.disconnect();
    connection.disconnect();

    let mut status = connection.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .unwrap();

    connection.shutdown().await;
}

#[tokio::test]
async fn shutdown_prevents_further_sends() {
    let connector = MockConnector::new(vec![Script::Session(vec![])]);
    let (mut connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    connection.shutdown().await;

    let result = connection.send(Action::Ping, json!({}));
    assert!(matches!(result, Err(SyncError::NotConnected)));
}

#[tokio::test]
async fn drop_without_explicit_shutdown_does_not_hang() {
    let connector = MockConnector::new(vec![Script::Session(vec![])]);
    let (connection, _token_tx, _) = start(Arc::clone(&connector), Some("tok"));

    wait_until("session up", || {
        connection.status() == ConnectionStatus::Connected
    })
    .await;

    drop(connection);
    // Reaching this point without hanging is the assertion.
}
