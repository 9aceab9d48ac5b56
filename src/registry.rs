//! Subscriber registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::subscriber::{Subscriber, SubscriberId};

/// Thread-safe set of active subscribers keyed by identity.
///
/// Iteration works on a copy of the membership taken at call time, so
/// callbacks may register or unregister without deadlocking and without
/// disturbing the iteration in progress.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns `false` if one with the same id is already
    /// registered; the existing handle is kept.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        let id = subscriber.id();
        let mut subs = self.subscribers.write();
        if subs.contains_key(&id) {
            return false;
        }
        subs.insert(id, subscriber);
        tracing::debug!(subscriber = %id, total = subs.len(), "subscriber registered");
        true
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id);
        if removed.is_some() {
            tracing::debug!(subscriber = %id, "subscriber unregistered");
        }
        removed.is_some()
    }

    /// Membership at this instant.
    #[must_use]
    pub fn active(&self) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers.read().values().cloned().collect()
    }

    /// Call `f` once per subscriber registered at call time.
    pub fn for_each_active<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<dyn Subscriber>),
    {
        for subscriber in &self.active() {
            f(subscriber);
        }
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::error::DeliveryError;
    use crate::snapshot::Snapshot;

    #[derive(Default)]
    struct Counting {
        id: SubscriberId,
        hits: AtomicUsize,
    }

    impl Subscriber for Counting {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn deliver(&self, _snapshot: &Arc<Snapshot>) -> Result<(), DeliveryError> {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let sub: Arc<dyn Subscriber> = Arc::new(Counting::default());
        assert!(registry.register(Arc::clone(&sub)));
        assert!(!registry.register(Arc::clone(&sub)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let registry = SubscriberRegistry::new();
        assert!(!registry.unregister(SubscriberId::new()));

        let sub = Arc::new(Counting::default());
        let id = sub.id();
        registry.register(sub);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_for_each_active_visits_each_once() {
        let registry = SubscriberRegistry::new();
        for _ in 0..5 {
            registry.register(Arc::new(Counting::default()));
        }
        let mut seen = Vec::new();
        registry.for_each_active(|s| seen.push(s.id()));
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_mutation_during_iteration() {
        let registry = SubscriberRegistry::new();
        let first = Arc::new(Counting::default());
        registry.register(first.clone());
        registry.register(Arc::new(Counting::default()));

        let mut visited = 0;
        registry.for_each_active(|s| {
            visited += 1;
            registry.unregister(s.id());
            registry.register(Arc::new(Counting::default()));
        });

        assert_eq!(visited, 2);
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(first.id()));
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = Arc::new(SubscriberRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let sub = Arc::new(Counting::default());
                        let id = sub.id();
                        assert!(registry.register(sub));
                        registry.for_each_active(|_| {});
                        assert!(registry.unregister(id));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear() {
        let registry = SubscriberRegistry::new();
        registry.register(Arc::new(Counting::default()));
        registry.clear();
        assert!(registry.is_empty());
    }
}
