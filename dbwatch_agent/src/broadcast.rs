//! Fan-out of status snapshots and log lines to every connected subscriber.
//!
//! Subscribers live in a map keyed by id, each with its own bounded queue.
//! Delivery is a non-blocking `try_send`; a closed or full queue drops that
//! subscriber without disturbing the rest. The current snapshot, connected or
//! not, lives here
//! too, under the same lock as the subscriber map, so a subscriber that joins
//! while a cycle is publishing sees either the old snapshot or the new one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{MonitorEvent, Status};

pub type SubscriberId = u64;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<MonitorEvent>,
    registered_at: Instant,
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<SubscriberId, Subscriber>,
    last: Option<Status>,
    next_id: SubscriberId,
    closed: bool,
}

impl Inner {
    // Deliver to all; returns (delivered, failed ids).
    fn deliver(&self, event: &MonitorEvent) -> (usize, Vec<SubscriberId>) {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sub) in &self.subscribers {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(*id),
            }
        }
        (delivered, failed)
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some(sub) => {
                debug!(
                    "subscriber {id} left after {:?}",
                    sub.registered_at.elapsed()
                );
                true
            }
            None => false,
        }
    }
}

pub struct Broadcaster {
    inner: Mutex<Inner>,
    buffer: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panic while holding the lock leaves the map intact; keep going
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a subscriber. If a snapshot is known it is queued for this
    /// subscriber only.
    pub fn register(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if !inner.closed {
            if let Some(last) = inner.last.clone() {
                // fresh queue with capacity >= 1, cannot be full
                let _ = tx.try_send(MonitorEvent::Status(last));
            }
            inner.subscribers.insert(
                id,
                Subscriber {
                    tx,
                    registered_at: Instant::now(),
                },
            );
            debug!("subscriber {id} joined ({} active)", inner.subscribers.len());
        }
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Idempotent.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.lock().remove(id)
    }

    /// Deliver to every active subscriber. Returns how many accepted it.
    pub fn broadcast(&self, event: MonitorEvent) -> usize {
        let mut inner = self.lock();
        let (delivered, failed) = inner.deliver(&event);
        for id in failed {
            inner.remove(id);
        }
        delivered
    }

    /// Store `status` as the last-known snapshot and broadcast it, atomically
    /// with respect to [`Broadcaster::register`].
    pub fn publish_status(&self, status: Status) -> usize {
        let mut inner = self.lock();
        inner.last = Some(status.clone());
        let (delivered, failed) = inner.deliver(&MonitorEvent::Status(status));
        for id in failed {
            inner.remove(id);
        }
        delivered
    }

    pub fn last_status(&self) -> Option<Status> {
        self.lock().last.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Drop every subscriber queue so their streams end. Later registrations
    /// get an already-finished subscription.
    pub fn close_all(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let n = inner.subscribers.len();
        inner.subscribers.clear();
        n
    }
}

/// Receiving end of one subscriber. Unregisters itself on drop.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<MonitorEvent>,
    hub: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once unregistered and drained.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = MonitorEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let ev = sub.recv().await?;
            Some((ev, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}
