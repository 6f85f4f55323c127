//! In-process event emitter for the three generation channels.
//!
//! Native backends that run inside the process push results through
//! [`LocalEventEmitter::emit`]; the engine handle subscribes through the
//! [`EventEmitter`] trait. Handlers are snapshotted before delivery, so a
//! handler may remove listeners (itself included) while it runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use amaryllis_core::engine::{EventChannel, EventEmitter, EventHandler, EventSubscription};
use tracing::trace;

type Listeners = HashMap<EventChannel, Vec<(u64, EventHandler)>>;

#[derive(Default)]
struct Registry {
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
}

/// A cloneable in-process [`EventEmitter`]. Clones share listeners.
#[derive(Clone, Default)]
pub struct LocalEventEmitter {
    registry: Arc<Registry>,
}

impl LocalEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every listener on `channel`, in registration order.
    /// Returns the number of handlers invoked.
    pub fn emit(&self, channel: EventChannel, payload: &str) -> usize {
        let handlers: Vec<EventHandler> = {
            let listeners = self.registry.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners
                .get(&channel)
                .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        trace!(channel = channel.name(), listeners = handlers.len(), "Emitting event");
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub fn listener_count(&self, channel: EventChannel) -> usize {
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Listeners across all channels.
    pub fn total_listeners(&self) -> usize {
        EventChannel::ALL.iter().map(|c| self.listener_count(*c)).sum()
    }
}

impl EventEmitter for LocalEventEmitter {
    fn add_listener(&self, channel: EventChannel, handler: EventHandler) -> Box<dyn EventSubscription> {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(channel)
            .or_default()
            .push((id, handler));
        Box::new(LocalSubscription {
            registry: Arc::downgrade(&self.registry),
            channel,
            id,
            removed: AtomicBool::new(false),
        })
    }
}

struct LocalSubscription {
    registry: Weak<Registry>,
    channel: EventChannel,
    id: u64,
    removed: AtomicBool,
}

impl EventSubscription for LocalSubscription {
    fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut listeners = registry.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = listeners.get_mut(&self.channel) {
            entries.retain(|(id, _)| *id != self.id);
        }
    }
}
