//! Change-event delivery for store implementations.
//!
//! Committed batches are queued on a channel and delivered to every registered
//! callback from a single dispatcher thread, so callbacks observe batches in
//! commit order and never run on the writer's call stack.

use super::{ChangeCallback, ChangeEvent};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

struct Registry {
    next_id: AtomicU64,
    callbacks: RwLock<BTreeMap<u64, ChangeCallback>>,
}

pub struct Notifier {
    registry: Arc<Registry>,
    sender: Option<Sender<Vec<ChangeEvent>>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Starts the dispatcher thread.
    pub fn new() -> std::io::Result<Self> {
        let registry = Arc::new(Registry {
            next_id: AtomicU64::new(0),
            callbacks: RwLock::new(BTreeMap::new()),
        });
        let (sender, receiver) = mpsc::channel();

        let dispatcher = {
            let registry = registry.clone();
            thread::Builder::new()
                .name("qhist-notifier".to_string())
                .spawn(move || dispatch(registry, receiver))?
        };

        Ok(Self {
            registry,
            sender: Some(sender),
            dispatcher: Some(dispatcher),
        })
    }

    /// Registers a callback. It stays registered until the subscription is dropped.
    pub fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.callbacks.write().insert(id, callback);

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Queues a committed batch for delivery. Empty batches are skipped.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(events).is_err() {
            tracing::warn!("Notifier dispatcher has stopped; change events dropped.");
        }
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.registry.callbacks.read().len()
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the channel ends the dispatcher loop once queued batches are delivered.
        self.sender.take();

        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.thread().id() == thread::current().id() {
                return;
            }
            if dispatcher.join().is_err() {
                tracing::error!("Notifier dispatcher panicked.");
            }
        }
    }
}

fn dispatch(registry: Arc<Registry>, receiver: Receiver<Vec<ChangeEvent>>) {
    for batch in receiver {
        let callbacks = registry.callbacks.read();
        for callback in callbacks.values() {
            callback(&batch);
        }
    }
}

/// Keeps a change callback registered.
///
/// Dropping the subscription unregisters the callback. If a delivery is in
/// progress, the drop waits for it, so no callback runs after the drop returns.
/// Must not be dropped from inside its own callback.
#[must_use = "dropping a subscription unregisters its callback"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let removed = registry.callbacks.write().remove(&self.id);
            drop(removed);
        }
    }
}
