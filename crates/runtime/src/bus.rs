//! Event Bus - in-process publish/subscribe
//!
//! Responsibilities:
//! - Keep handlers per event type
//! - Deliver each published event at most once to every current subscriber
//!
//! No persistence and no replay. Handlers run synchronously on the publishing
//! thread; anything slow should hand off to a task.

use nodemesh_core::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Handler invoked for each matching event
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types = self.handlers.read().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("EventBus")
            .field("event_types", &types)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event_type = event_type.into();
        match self.handlers.write() {
            Ok(mut handlers) => {
                handlers
                    .entry(event_type.clone())
                    .or_default()
                    .push((id, Arc::new(handler)));
                debug!(event_type = %event_type, subscription = id.0, "subscribed");
            }
            Err(e) => warn!(error = %e, "event bus lock poisoned, subscription dropped"),
        }
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut handlers) = self.handlers.write() else {
            return false;
        };
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Deliver `event` to the handlers subscribed to its type.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event: &Event) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe while running
        let snapshot: Vec<EventHandler> = match self.handlers.read() {
            Ok(handlers) => handlers
                .get(&event.event_type)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "event bus lock poisoned, event dropped");
                return 0;
            }
        };

        debug!(
            event_type = %event.event_type,
            handlers = snapshot.len(),
            "publishing event"
        );
        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(event_type).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}
