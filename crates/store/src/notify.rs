//! Change Notification - Publish/subscribe primitive for record and relationship changes
//!
//! The reactive substrate of the surrounding application is treated as a
//! given capability; this module provides the dirty/notify primitive that
//! relationship state uses to announce visible transitions to observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::record::RecordIdentity;

/// A visible state transition announced to observers
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A has-many collection changed membership, order, or loaded state
    HasManyChanged { owner: RecordIdentity, field: String },
    /// A belongs-to field changed value
    BelongsToChanged { owner: RecordIdentity, field: String },
    /// A record's attributes were updated in place
    RecordUpdated { record: RecordIdentity },
}

/// Identifier returned by [`ChangeNotifier::subscribe`], used to unsubscribe
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Listener registry with synchronous delivery
///
/// Listeners are invoked on the emitting thread, outside the internal lock,
/// so a listener may subscribe or unsubscribe re-entrantly.
pub struct ChangeNotifier {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    /// Create a new notifier with no listeners
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener; returns an id usable with [`unsubscribe`](Self::unsubscribe)
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns false if the id was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Deliver an event to every registered listener
    pub fn emit(&self, event: &ChangeEvent) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordId, TypeKey};
    use std::sync::Mutex;

    fn identity(type_key: &str, id: &str) -> RecordIdentity {
        RecordIdentity::new(TypeKey::new(type_key).unwrap(), RecordId::from(id))
    }

    #[test]
    fn test_subscribe_and_emit() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        notifier.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event.clone());
        });

        let event = ChangeEvent::HasManyChanged {
            owner: identity("post", "1"),
            field: "comments".to_string(),
        };
        notifier.emit(&event);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], event);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(0usize));

        let seen_clone = Arc::clone(&seen);
        let id = notifier.subscribe(move |_| {
            *seen_clone.lock().unwrap() += 1;
        });

        let event = ChangeEvent::RecordUpdated {
            record: identity("comment", "1"),
        };
        notifier.emit(&event);
        assert!(notifier.unsubscribe(id));
        notifier.emit(&event);

        assert_eq!(*seen.lock().unwrap(), 1);
        assert!(!notifier.unsubscribe(id));
    }

    #[test]
    fn test_listener_count() {
        let notifier = ChangeNotifier::new();
        assert_eq!(notifier.listener_count(), 0);
        let id = notifier.subscribe(|_| {});
        notifier.subscribe(|_| {});
        assert_eq!(notifier.listener_count(), 2);
        notifier.unsubscribe(id);
        assert_eq!(notifier.listener_count(), 1);
    }
}
