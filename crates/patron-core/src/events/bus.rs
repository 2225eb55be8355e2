//! Minimal broadcast bus
//!
//! Every subscriber owns an unbounded queue. Publishing pushes a clone of the
//! event into each queue and returns immediately, so a slow or failing
//! subscriber never delays the publisher or other subscribers. Dropping a
//! [`Subscription`] unsubscribes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

struct Subscribers<T> {
    next_id: AtomicU64,
    senders: Mutex<Vec<(u64, mpsc::UnboundedSender<T>)>>,
}

impl<T> Subscribers<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, mpsc::UnboundedSender<T>)>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(sid, _)| *sid != id);
    }
}

/// Multi-producer, multi-consumer broadcast channel
pub struct EventBus<T> {
    subscribers: Arc<Subscribers<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Subscribers {
                next_id: AtomicU64::new(0),
                senders: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a new subscriber
    ///
    /// The subscriber sees every event published after this call.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push((id, tx));
        Subscription {
            id,
            rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver an event to every current subscriber
    ///
    /// The subscriber list lock is released before anything is delivered.
    pub fn publish(&self, event: T) {
        let senders: Vec<(u64, mpsc::UnboundedSender<T>)> = self.subscribers.lock().clone();

        let mut closed = Vec::new();
        for (id, sender) in &senders {
            if sender.send(event.clone()).is_err() {
                closed.push(*id);
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .lock()
                .retain(|(id, _)| !closed.contains(id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Handle to a bus subscription
///
/// Receives events in publication order. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    subscribers: Weak<Subscribers<T>>,
}

impl<T> Subscription<T> {
    /// Wait for the next event
    ///
    /// Returns `None` once the bus is gone and all queued events are read.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drain every queued event
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.id);
        }
    }
}
