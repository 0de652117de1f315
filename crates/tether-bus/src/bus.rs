//! # In-process publish/subscribe router.
//!
//! [`EventBus`] fans every published event out to per-subscriber queues.
//! Subscribers either filter on one kind name or receive everything.
//!
//! ```text
//! Publishers (many):                  Subscriptions (many):
//!   deployer ──┐                     ┌──► kind = project.CompleteEvent
//!   watcher  ──┼──► EventBus ────────┼──► all kinds (stream client #1)
//!   reloader ──┘   (try_send)        └──► all kinds (stream client #2)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never awaits; it uses `try_send` on
//!   each matching queue.
//! - **Per-subscriber order**: a subscription observes events in the order they
//!   were handed to its queue; there is no cross-subscription ordering.
//! - **Bounded queues**: every subscription owns a queue of `capacity` events.
//! - **Slow subscribers are dropped**: when a queue is full the subscription is
//!   deregistered and its queue closes once the buffered events are drained.
//!   The publisher is never slowed down by one lagging consumer.
//! - **No persistence**: events published with no matching subscriber are gone.

use crate::error::Result;
use crate::event::{BusEvent, Event};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Default queue length for each subscription.
pub const DEFAULT_CAPACITY: usize = 256;

/// Handle to a shared event bus.
///
/// Cheap to clone; every clone publishes to and subscribes on the same
/// registry. Construct one per process (or per test) and pass it around.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Registration>>,
}

struct Registration {
    filter: Option<String>,
    tx: mpsc::Sender<BusEvent>,
    evicted: AtomicBool,
}

impl Registration {
    fn accepts(&self, kind: &str) -> bool {
        if self.evicted.load(Ordering::Acquire) {
            return false;
        }
        match &self.filter {
            Some(filter) => filter == kind,
            None => true,
        }
    }
}

impl EventBus {
    /// Creates a bus whose subscriptions each buffer `capacity` events.
    ///
    /// The minimum capacity is 1 (clamped).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(0),
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Per-subscription queue capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Serializes `event` and delivers it to every matching subscription.
    ///
    /// Returns how many queues accepted the event.
    pub fn publish<E: Event>(&self, event: E) -> Result<usize> {
        let event = BusEvent::new(event)?;
        Ok(self.publish_event(event))
    }

    /// Delivers an already wrapped event.
    pub fn publish_event(&self, event: BusEvent) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        {
            let subscribers = self.inner.subscribers.read();
            for (id, registration) in subscribers.iter() {
                if !registration.accepts(event.kind()) {
                    continue;
                }
                match registration.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        registration.evicted.store(true, Ordering::Release);
                        tracing::warn!(
                            subscription = id,
                            kind = event.kind(),
                            capacity = self.inner.capacity,
                            "subscriber fell behind, dropping subscription"
                        );
                        stale.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => stale.push(*id),
                }
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for id in stale {
                subscribers.remove(&id);
            }
        }

        tracing::trace!(kind = event.kind(), delivered, "published");
        delivered
    }

    /// Subscribes to one event type.
    pub fn subscribe<E: Event>(&self) -> TypedSubscription<E> {
        TypedSubscription {
            inner: self.register(Some(E::KIND.to_string())),
            _marker: PhantomData,
        }
    }

    /// Subscribes to one event kind by name.
    pub fn subscribe_kind(&self, kind: impl Into<String>) -> Subscription {
        self.register(Some(kind.into()))
    }

    /// Subscribes to every event kind.
    pub fn subscribe_all(&self) -> Subscription {
        self.register(None)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    fn register(&self, filter: Option<String>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.subscribers.write().insert(
            id,
            Registration {
                filter,
                tx,
                evicted: AtomicBool::new(false),
            },
        );
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A live registration on the bus with its own delivery queue.
///
/// Dropping the subscription deregisters it; [`Subscription::unsubscribe`]
/// does the same explicitly. Either way it happens exactly once.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<BusEvent>,
    bus: Weak<Inner>,
}

impl Subscription {
    /// Registry id, useful in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscription was dropped by the bus (or the
    /// bus itself is gone) and every buffered event has been received.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Returns a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Deregisters from the bus and releases the queue.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.subscribers.write().remove(&self.id);
        }
    }
}

/// A subscription filtered to one event type, yielding typed values.
pub struct TypedSubscription<E: Event> {
    inner: Subscription,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Event> TypedSubscription<E> {
    /// Waits for the next event of type `E`.
    pub async fn recv(&mut self) -> Option<Arc<E>> {
        loop {
            let event = self.inner.recv().await?;
            if let Some(value) = event.downcast::<E>() {
                return Some(value);
            }
        }
    }

    /// Deregisters from the bus.
    pub fn unsubscribe(self) {}

    /// The untyped subscription underneath.
    pub fn into_inner(self) -> Subscription {
        self.inner
    }
}
