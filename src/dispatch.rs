//! Fan-out of inbound events to independently registered consumers.
//!
//! UI surfaces register a consumer when they mount and remove it when they
//! unmount; registrations outlive any individual connection session. Every
//! inbound [`ServerEvent`] is delivered to every consumer registered at
//! dispatch time. Consumers are expected to match on the event variant and
//! ignore ones they don't handle.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::protocol::ServerEvent;

/// Handle for removing a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

type Consumer = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Registry of event consumers.
///
/// Membership changes are O(amortized 1) and never disturb a delivery
/// already in flight: [`dispatch`](Dispatcher::dispatch) snapshots the
/// consumer list before calling anyone. A consumer that panics is isolated
/// — the panic is caught, logged, and delivery continues to the remaining
/// consumers.
#[derive(Default)]
pub struct Dispatcher {
    consumers: Mutex<Vec<(ConsumerId, Consumer)>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer; returns the handle needed to remove it.
    pub fn add_consumer<F>(&self, consumer: F) -> ConsumerId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.push((id, Arc::new(consumer)));
        }
        id
    }

    /// Remove a previously registered consumer. Removing an id twice, or an
    /// id that was never registered, is a no-op.
    pub fn remove_consumer(&self, id: ConsumerId) {
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.retain(|(cid, _)| *cid != id);
        }
    }

    /// Number of currently registered consumers.
    pub fn len(&self) -> usize {
        self.consumers.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every currently registered consumer.
    pub fn dispatch(&self, event: &ServerEvent) {
        // Snapshot under the lock, deliver outside it, so consumers may
        // re-enter add/remove without deadlocking.
        let snapshot: Vec<Consumer> = match self.consumers.lock() {
            Ok(consumers) => consumers.iter().map(|(_, c)| Arc::clone(c)).collect(),
            Err(poisoned) => {
                warn!("consumer registry poisoned, delivering to recovered set");
                poisoned
                    .into_inner()
                    .iter()
                    .map(|(_, c)| Arc::clone(c))
                    .collect()
            }
        };

        for consumer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| consumer(event))).is_err() {
                error!("event consumer panicked; continuing delivery");
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("consumers", &self.len())
            .finish()
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
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dispatch_reaches_every_consumer() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            dispatcher.add_consumer(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        dispatcher.dispatch(&ServerEvent::CardDrawReset);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn removed_consumer_no_longer_receives() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = Arc::clone(&hits);
        let id = dispatcher.add_consumer(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(&ServerEvent::Pong);
        dispatcher.remove_consumer(id);
        dispatcher.dispatch(&ServerEvent::Pong);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_twice_is_noop() {
        let dispatcher = Dispatcher::new();
        let id = dispatcher.add_consumer(|_| {});
        dispatcher.remove_consumer(id);
        dispatcher.remove_consumer(id);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn panicking_consumer_does_not_block_others() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.add_consumer(|_| panic!("boom"));
        let hits2 = Arc::clone(&hits);
        dispatcher.add_consumer(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(&ServerEvent::CardDrawReset);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn consumer_may_remove_itself_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new());
        let slot: Arc<Mutex<Option<ConsumerId>>> = Arc::new(Mutex::new(None));

        let d2 = Arc::clone(&dispatcher);
        let slot2 = Arc::clone(&slot);
        let id = dispatcher.add_consumer(move |_| {
            if let Some(id) = slot2.lock().unwrap().take() {
                d2.remove_consumer(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        dispatcher.dispatch(&ServerEvent::Pong);
        assert!(dispatcher.is_empty());
    }
}
