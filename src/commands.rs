//! HTTP command layer for scoreboard mutations.
//!
//! Mutating commands (score entry, confirmations, team changes) go over
//! plain HTTP rather than the realtime channel; the server broadcasts the
//! resulting state change back to every client through the room topic.
//!
//! Every command passes the [`DedupGate`] first. A rejected duplicate never
//! touches the network: the caller gets a synthetic response carrying
//! [`CommandResponse::DUPLICATE_REQUEST`], shaped like a server reply so
//! call sites need no special casing.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::dedup::{Admission, CommandSpec, DedupGate};
use crate::error::{Result, SyncError};

/// Envelope code for a successful command.
const CODE_SUCCESS: &str = "SUCCESS";

/// Server reply envelope, `{code, message, data}`.
///
/// Servers occasionally reply with a bare JSON body instead of the
/// envelope; those are wrapped as successes with the body in `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub code: String,
    pub message: Option<String>,
    pub data: Value,
}

impl CommandResponse {
    /// Code carried by the synthetic response for a suppressed duplicate.
    pub const DUPLICATE_REQUEST: &'static str = "DUPLICATE_REQUEST";

    /// Whether this response is the synthetic duplicate-suppression reply.
    pub fn is_duplicate(&self) -> bool {
        self.code == Self::DUPLICATE_REQUEST
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    fn duplicate() -> Self {
        Self {
            code: Self::DUPLICATE_REQUEST.to_owned(),
            message: Some("identical command already in flight".to_owned()),
            data: Value::Null,
        }
    }

    /// Interpret a response body: the standard envelope when it looks like
    /// one, otherwise the whole body wrapped as a success.
    fn from_value(value: Value) -> Self {
        if let Value::Object(obj) = &value {
            if let Some(code) = obj.get("code").and_then(Value::as_str) {
                return Self {
                    code: code.to_owned(),
                    message: obj
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    data: obj.get("data").cloned().unwrap_or(Value::Null),
                };
            }
        }
        Self {
            code: CODE_SUCCESS.to_owned(),
            message: None,
            data: value,
        }
    }
}

/// Client for scoreboard HTTP commands.
///
/// Holds a connection-pooling [`reqwest::Client`]; cheap to clone. The
/// bearer token is read from the same `watch` channel the realtime
/// connection uses, so both layers rotate credentials together.
#[derive(Debug, Clone)]
pub struct CommandClient {
    http: reqwest::Client,
    base_url: String,
    token_rx: watch::Receiver<Option<String>>,
    gate: Arc<DedupGate>,
}

impl CommandClient {
    /// Create a client with a default [`DedupGate`]. Trailing slashes on
    /// the base URL are tolerated.
    pub fn new(
        base_url: impl Into<String>,
        token_rx: watch::Receiver<Option<String>>,
        gate: Arc<DedupGate>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            token_rx,
            gate,
        }
    }

    /// Replace the underlying HTTP client (custom TLS, proxies, timeouts).
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// The gate guarding this client's commands.
    pub fn gate(&self) -> &Arc<DedupGate> {
        &self.gate
    }

    /// Execute one command.
    ///
    /// Suppressed duplicates short-circuit with a synthetic
    /// [`DUPLICATE_REQUEST`](CommandResponse::DUPLICATE_REQUEST) response
    /// and never reach the network. The in-flight record is cleared when
    /// the request resolves, whether it succeeded or failed.
    ///
    /// # Errors
    ///
    /// [`SyncError::MissingCredentials`] when no bearer token is available,
    /// [`SyncError::Http`] for network or protocol failures,
    /// [`SyncError::Io`] for a malformed HTTP method in `spec`.
    pub async fn execute(&self, spec: CommandSpec) -> Result<CommandResponse> {
        let fingerprint = spec.fingerprint();
        if self.gate.admit(&spec).is_duplicate() {
            debug!(%fingerprint, "suppressing duplicate command");
            return Ok(CommandResponse::duplicate());
        }

        match self.perform(&spec).await {
            Ok(response) => {
                self.gate.complete(&fingerprint);
                Ok(response)
            }
            Err(e) => {
                // Clear the record so the retry isn't mistaken for a dup.
                self.gate.complete(&fingerprint);
                warn!(%fingerprint, error = %e, "command failed");
                Err(e)
            }
        }
    }

    async fn perform(&self, spec: &CommandSpec) -> Result<CommandResponse> {
        let token = self
            .token_rx
            .borrow()
            .clone()
            .ok_or(SyncError::MissingCredentials)?;

        let method = reqwest::Method::from_bytes(spec.method.to_uppercase().as_bytes())
            .map_err(|_| {
                SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid HTTP method: {}", spec.method),
                ))
            })?;
        let url = format!("{}{}", self.base_url, spec.path);

        let mut request = self.http.request(method, &url).bearer_auth(token);
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        debug!(%url, %status, "command completed");

        Ok(CommandResponse::from_value(body))
    }
}

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
    use crate::dedup::DedupConfig;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn token_channel(token: Option<&str>) -> watch::Receiver<Option<String>> {
        // The receiver keeps serving the last value after the sender drops.
        let (_tx, rx) = watch::channel(token.map(str::to_owned));
        rx
    }

    fn strict_gate() -> Arc<DedupGate> {
        Arc::new(DedupGate::new(
            DedupConfig::new().with_grace_window(Duration::ZERO),
        ))
    }

    /// One-shot HTTP server: reads a request, optionally stalls, then
    /// replies with the given JSON body. Returns the base URL and the raw
    /// bytes of the received request.
    async fn one_shot_server(
        body: &'static str,
        delay: Duration,
    ) -> (String, tokio::sync::oneshot::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            buf.truncate(n);
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = seen_tx.send(buf);
        });

        (format!("http://{addr}"), seen_rx)
    }

    #[test]
    fn envelope_body_is_parsed() {
        let response = CommandResponse::from_value(json!({
            "code": "SUCCESS",
            "message": "ok",
            "data": { "memberId": 7 }
        }));
        assert!(response.is_success());
        assert_eq!(response.message.as_deref(), Some("ok"));
        assert_eq!(response.data["memberId"], 7);
    }

    #[test]
    fn bare_body_is_wrapped_as_success() {
        let response = CommandResponse::from_value(json!([1, 2, 3]));
        assert!(response.is_success());
        assert_eq!(response.data, json!([1, 2, 3]));
    }

    #[test]
    fn duplicate_response_is_flagged() {
        let response = CommandResponse::duplicate();
        assert!(response.is_duplicate());
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn missing_token_fails_before_the_network() {
        let client = CommandClient::new("http://127.0.0.1:1", token_channel(None), strict_gate());

        let err = client
            .execute(CommandSpec::post("/games/1/confirm"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingCredentials));
    }

    #[tokio::test]
    async fn execute_parses_server_envelope() {
        let (base_url, seen_rx) =
            one_shot_server(r#"{"code":"SUCCESS","data":{"grade":2}}"#, Duration::ZERO).await;
        let client = CommandClient::new(base_url, token_channel(Some("tok-123")), strict_gate());

        let response = client
            .execute(CommandSpec::post("/games/1/grades").with_body(json!({ "grade": 2 })))
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.data["grade"], 2);

        let request = String::from_utf8(seen_rx.await.unwrap()).unwrap();
        assert!(request.starts_with("POST /games/1/grades"));
        assert!(request.contains("Bearer tok-123"));
    }

    #[tokio::test]
    async fn rapid_duplicate_gets_synthetic_response() {
        let (base_url, _seen_rx) =
            one_shot_server(r#"{"code":"SUCCESS"}"#, Duration::from_millis(200)).await;
        let client = CommandClient::new(base_url, token_channel(Some("tok")), strict_gate());

        let spec = CommandSpec::post("/games/1/scoreboards").with_body(json!({ "game1Score": 200 }));

        let slow = {
            let client = client.clone();
            let spec = spec.clone();
            tokio::spawn(async move { client.execute(spec).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Identical command while the first is still in flight.
        let second = client.execute(spec).await.unwrap();
        assert!(second.is_duplicate());

        let first = slow.await.unwrap().unwrap();
        assert!(first.is_success());
    }

    #[tokio::test]
    async fn completion_clears_the_in_flight_record() {
        let (base_url, _seen_rx) = one_shot_server(r#"{"code":"SUCCESS"}"#, Duration::ZERO).await;
        let gate = strict_gate();
        let client = CommandClient::new(base_url, token_channel(Some("tok")), Arc::clone(&gate));

        let spec = CommandSpec::post("/games/1/confirm");
        client.execute(spec.clone()).await.unwrap();

        assert_eq!(gate.pending_len(), 0);
    }

    #[tokio::test]
    async fn failed_request_clears_the_in_flight_record() {
        // Nothing listens here; the request fails at connect time.
        let gate = strict_gate();
        let client = CommandClient::new(
            "http://127.0.0.1:1",
            token_channel(Some("tok")),
            Arc::clone(&gate),
        );

        let err = client
            .execute(CommandSpec::post("/games/1/confirm"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Http(_)));
        assert_eq!(gate.pending_len(), 0);
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let client = CommandClient::new(
            "http://127.0.0.1:1",
            token_channel(Some("tok")),
            strict_gate(),
        );

        let err = client
            .execute(CommandSpec::new("NOT A METHOD", "/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
