//! Duplicate suppression for outgoing HTTP commands.
//!
//! A jittery touch UI re-fires the same mutating request easily: double
//! taps, refresh races, effects running twice. The [`DedupGate`] fingerprints
//! each command and rejects a near-duplicate issued while an identical one
//! is still in flight, without blocking the legitimate repeats a client
//! needs to recover after a page reload.
//!
//! The gate is an ordinary constructed value, not process-global state, so
//! tests can create independent instances with their own clocks and
//! configuration. Time is read through [`tokio::time::Instant`], which
//! follows the paused test clock under `#[tokio::test(start_paused = true)]`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

/// Default grace window after gate construction (page load).
const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(2);

/// Default age at which an in-flight record is considered abandoned.
const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default minimum spacing between identical commands.
const DEFAULT_MIN_SPACING: Duration = Duration::from_millis(100);

/// Default period of the background sweep.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3);

// ── Configuration ───────────────────────────────────────────────────

/// Tuning knobs for a [`DedupGate`].
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Window after construction during which everything is admitted and
    /// prior records are reset. A fresh page load must not be blocked by
    /// bookkeeping left over from the previous page instance.
    pub grace_window: Duration,
    /// Age past which an in-flight record is treated as abandoned (the
    /// request silently never resolved) and a repeat is admitted.
    pub stale_timeout: Duration,
    /// Identical commands closer together than this are rejected as
    /// duplicates; further apart, the repeat is considered deliberate.
    pub min_spacing: Duration,
    /// Period of the background [`sweep`](DedupGate::sweep).
    pub sweep_interval: Duration,
    /// Path fragments of idempotent listing-style GETs that are always safe
    /// to repeat and must never be blocked.
    pub lenient_paths: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            grace_window: DEFAULT_GRACE_WINDOW,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            min_spacing: DEFAULT_MIN_SPACING,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            lenient_paths: Vec::new(),
        }
    }
}

impl DedupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    #[must_use]
    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = stale_timeout;
        self
    }

    #[must_use]
    pub fn with_min_spacing(mut self, min_spacing: Duration) -> Self {
        self.min_spacing = min_spacing;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Add a lenient path fragment (matched as a substring of the request
    /// path, GET only).
    #[must_use]
    pub fn with_lenient_path(mut self, fragment: impl Into<String>) -> Self {
        self.lenient_paths.push(fragment.into());
        self
    }
}

// ── Command spec ────────────────────────────────────────────────────

/// Description of one outgoing HTTP command, sufficient to fingerprint it.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// HTTP method, e.g. `"POST"`.
    pub method: String,
    /// Request path relative to the API base, e.g. `/games/5/scoreboards`.
    pub path: String,
    /// Query parameters, order-insensitive for fingerprinting.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl CommandSpec {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Deterministic dedup key: `METHOD:path?sortedQuery:body`. Query
    /// parameters are sorted so logically identical requests collide.
    pub fn fingerprint(&self) -> String {
        let mut key = format!("{}:{}", self.method.to_uppercase(), self.path);

        if !self.query.is_empty() {
            let mut params = self.query.clone();
            params.sort();
            let joined = params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            key.push('?');
            key.push_str(&joined);
        }

        if let Some(body) = &self.body {
            key.push(':');
            key.push_str(&body.to_string());
        }

        key
    }

    fn is_lenient(&self, patterns: &[String]) -> bool {
        self.method.eq_ignore_ascii_case("GET")
            && patterns.iter().any(|p| self.path.contains(p.as_str()))
    }
}

// ── Gate ────────────────────────────────────────────────────────────

/// Outcome of asking the gate whether a command may be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Send it; call [`DedupGate::complete`] when it resolves.
    Admitted,
    /// A near-identical command is in flight. This is a soft signal, not a
    /// failure — callers surface it quietly or not at all.
    Duplicate,
}

impl Admission {
    pub fn is_duplicate(self) -> bool {
        matches!(self, Admission::Duplicate)
    }
}

/// Suppresses near-duplicate commands within a short window.
///
/// One instance per page/process; construct it at startup so the grace
/// window lines up with the page load.
#[derive(Debug)]
pub struct DedupGate {
    config: DedupConfig,
    started_at: Instant,
    pending: Mutex<HashMap<String, Instant>>,
}

impl DedupGate {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Decide whether `spec` may be sent, recording it if admitted.
    ///
    /// Evaluated in order: grace window after construction, no prior
    /// record, stale record, lenient pattern, minimum spacing, deliberate
    /// repeat. Only the minimum-spacing case rejects.
    pub fn admit(&self, spec: &CommandSpec) -> Admission {
        let fingerprint = spec.fingerprint();
        let now = Instant::now();
        let mut pending = self.lock_pending();

        if now.duration_since(self.started_at) < self.config.grace_window {
            // Cold start: anything recorded belongs to the previous page
            // instance and is meaningless now.
            pending.insert(fingerprint, now);
            return Admission::Admitted;
        }

        let Some(&recorded_at) = pending.get(&fingerprint) else {
            pending.insert(fingerprint, now);
            return Admission::Admitted;
        };

        let age = now.duration_since(recorded_at);

        if age >= self.config.stale_timeout {
            // The earlier command never completed; let the repeat through.
            debug!(%fingerprint, "dropping stale in-flight record");
            pending.insert(fingerprint, now);
            return Admission::Admitted;
        }

        if spec.is_lenient(&self.config.lenient_paths) {
            pending.insert(fingerprint, now);
            return Admission::Admitted;
        }

        if age < self.config.min_spacing {
            debug!(%fingerprint, ?age, "rejecting duplicate command");
            return Admission::Duplicate;
        }

        // Identical command re-issued after waiting: deliberate, allowed.
        pending.insert(fingerprint, now);
        Admission::Admitted
    }

    /// Clear the record for a completed command (success or failure).
    pub fn complete(&self, fingerprint: &str) {
        self.lock_pending().remove(fingerprint);
    }

    /// Purge records older than the stale timeout. Returns the number
    /// purged. Bounds memory and corrects for commands that never
    /// completed, independent of individual completions.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_timeout = self.config.stale_timeout;
        let mut pending = self.lock_pending();
        let before = pending.len();
        pending.retain(|_, recorded_at| now.duration_since(*recorded_at) < stale_timeout);
        before - pending.len()
    }

    /// Drop every in-flight record. Call on page unload / visibility
    /// hidden — a reload invalidates any notion of "in flight".
    pub fn clear_all(&self) {
        self.lock_pending().clear();
    }

    /// Number of in-flight records currently held.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Spawn the periodic sweep task for `gate`.
///
/// The original client runs this for the whole process lifetime; tests can
/// abort the returned handle instead.
pub fn start_sweeper(gate: Arc<DedupGate>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(gate.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let purged = gate.sweep();
            if purged > 0 {
                debug!(purged, "swept stale command records");
            }
        }
    })
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
    use serde_json::json;
    use tokio::time::advance;

    fn strict_config() -> DedupConfig {
        // Zero grace window so tests exercise the steady-state table.
        DedupConfig::new().with_grace_window(Duration::ZERO)
    }

    fn score_post() -> CommandSpec {
        CommandSpec::post("/games/5/scoreboards").with_body(json!({ "game1Score": 200 }))
    }

    #[test]
    fn fingerprint_sorts_query_parameters() {
        let a = CommandSpec::get("/games")
            .with_query("clubId", "9")
            .with_query("page", "1");
        let b = CommandSpec::get("/games")
            .with_query("page", "1")
            .with_query("clubId", "9");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_bodies() {
        let a = CommandSpec::post("/x").with_body(json!({ "grade": 1 }));
        let b = CommandSpec::post("/x").with_body(json!({ "grade": 2 }));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_duplicate_is_rejected() {
        let gate = DedupGate::new(strict_config());

        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
        advance(Duration::from_millis(50)).await;
        assert_eq!(gate.admit(&score_post()), Admission::Duplicate);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_repeat_is_admitted() {
        let gate = DedupGate::new(strict_config());

        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
        advance(Duration::from_millis(500)).await;
        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_record_recovers() {
        let gate = DedupGate::new(strict_config());

        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
        // Simulate a request that never resolved.
        advance(Duration::from_secs(4)).await;
        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_window_admits_everything() {
        let gate = DedupGate::new(DedupConfig::new());

        // Back-to-back duplicates right after construction.
        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn lenient_get_is_never_blocked() {
        let gate = DedupGate::new(strict_config().with_lenient_path("/scoreboards"));
        let listing = CommandSpec::get("/games/5/scoreboards");

        assert_eq!(gate.admit(&listing), Admission::Admitted);
        advance(Duration::from_millis(10)).await;
        assert_eq!(gate.admit(&listing), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn lenient_pattern_does_not_cover_posts() {
        let gate = DedupGate::new(strict_config().with_lenient_path("/scoreboards"));

        assert_eq!(gate.admit(&score_post()), Admission::Admitted);
        advance(Duration::from_millis(10)).await;
        assert_eq!(gate.admit(&score_post()), Admission::Duplicate);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_clears_the_record() {
        let gate = DedupGate::new(strict_config());
        let spec = score_post();

        assert_eq!(gate.admit(&spec), Admission::Admitted);
        gate.complete(&spec.fingerprint());
        advance(Duration::from_millis(1)).await;
        assert_eq!(gate.admit(&spec), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_only_stale_records() {
        let gate = DedupGate::new(strict_config());

        gate.admit(&score_post());
        advance(Duration::from_secs(2)).await;
        gate.admit(&CommandSpec::post("/games/5/confirm"));

        advance(Duration::from_millis(1500)).await;
        // First record is now ~3.5s old, second ~1.5s.
        assert_eq!(gate.sweep(), 1);
        assert_eq!(gate.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_drops_everything() {
        let gate = DedupGate::new(strict_config());
        gate.admit(&score_post());
        gate.admit(&CommandSpec::post("/games/5/confirm"));

        gate.clear_all();
        assert_eq!(gate.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_of_two_rapid_calls_is_admitted() {
        let gate = DedupGate::new(strict_config());
        let spec = score_post();

        let first = gate.admit(&spec);
        advance(Duration::from_millis(50)).await;
        let second = gate.admit(&spec);

        let admitted = [first, second]
            .iter()
            .filter(|a| **a == Admission::Admitted)
            .count();
        assert_eq!(admitted, 1);
        assert!(second.is_duplicate());
    }
}
