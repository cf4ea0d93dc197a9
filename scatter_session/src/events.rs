// Typed publish/subscribe for session events.
//
// Each subscriber owns a bounded `mpsc::sync_channel`. Publishing uses
// `try_send`, so the session actor never blocks on a slow UI: a full channel
// drops that event for that subscriber (logged), and a subscriber whose
// receiver was dropped is pruned on the next publish. `unsubscribe` removes a
// subscriber explicitly, which UI components do on teardown so handlers do
// not pile up across reconnect cycles.
//
// `EventBus` is cheap to clone; all clones share one subscriber list.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use scatter_protocol::Message;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A protocol message, inbound or (on the Host) broadcast locally.
    Message(Message),
    /// A local countdown started after clock compensation.
    CountdownStarted { remaining_ms: u64 },
    TimerWarning { remaining_ms: u64 },
    /// This device's round timer reached zero.
    TimerExpired,
    /// The transport to the Host dropped without a GAME_FINALIZE.
    ConnectionLost,
    /// The session was torn down locally.
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of one subscription.
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver<SessionEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<SessionEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<SessionEvent> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

struct BusInner {
    next_id: u64,
    capacity: usize,
    subscribers: Vec<(SubscriptionId, SyncSender<SessionEvent>)>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                capacity: capacity.max(1),
                subscribers: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        let (tx, receiver) = mpsc::sync_channel(inner.capacity);
        inner.subscribers.push((id, tx));
        Subscription { id, receiver }
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn publish(&self, event: SessionEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .subscribers
            .retain(|(id, tx)| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id.0, "event channel full, dropping event");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }
}
