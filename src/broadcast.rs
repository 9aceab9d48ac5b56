//! Broadcast engine: fans a snapshot out to every registered subscriber.
//!
//! Each delivery is isolated. A subscriber that is unreachable (or panics
//! while delivering) is pruned from the registry; a subscriber with a full
//! queue loses this update only. Nothing raised by a subscriber escapes
//! [`Broadcaster::broadcast`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DeliveryError;
use crate::registry::SubscriberRegistry;
use crate::snapshot::Snapshot;
use crate::subscriber::SubscriberId;

/// Outcome of one broadcast call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the snapshot.
    pub delivered: usize,
    /// Subscribers that were alive but could not take the snapshot.
    pub dropped: usize,
    /// Subscribers removed because they are no longer reachable.
    pub pruned: Vec<SubscriberId>,
}

#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    dropped_deliveries: AtomicU64,
    pruned_subscribers: AtomicU64,
}

impl Broadcaster {
    #[must_use]
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            dropped_deliveries: AtomicU64::new(0),
            pruned_subscribers: AtomicU64::new(0),
        }
    }

    /// Deliver `snapshot` to every subscriber registered at call time.
    pub fn broadcast(&self, snapshot: &Arc<Snapshot>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.registry.for_each_active(|subscriber| {
            let id = subscriber.id();
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.deliver(snapshot)))
                .unwrap_or(Err(DeliveryError::Unreachable(id)));

            match outcome {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Backpressure(_)) => {
                    self.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(subscriber = %id, "subscriber queue full, update dropped");
                    report.dropped += 1;
                }
                Err(DeliveryError::Unreachable(_)) => {
                    if self.registry.unregister(id) {
                        self.pruned_subscribers.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(subscriber = %id, "subscriber unreachable, pruned");
                    }
                    report.pruned.push(id);
                }
            }
        });

        tracing::trace!(
            timestamp = snapshot.timestamp,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned.len(),
            "broadcast complete"
        );
        report
    }

    /// Total updates dropped because a subscriber queue was full.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.dropped_deliveries.load(Ordering::Relaxed)
    }

    /// Total subscribers removed after an unreachable delivery.
    #[must_use]
    pub fn pruned_subscribers(&self) -> u64 {
        self.pruned_subscribers.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::subscriber::{ChannelSubscriber, Subscriber};

    enum Behaviour {
        Accept,
        Gone,
        Panic,
    }

    struct Scripted {
        id: SubscriberId,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Subscriber for Scripted {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn deliver(&self, _snapshot: &Arc<Snapshot>) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.behaviour {
                Behaviour::Accept => Ok(()),
                Behaviour::Gone => Err(DeliveryError::Unreachable(self.id)),
                Behaviour::Panic => panic!("listener blew up"),
            }
        }
    }

    fn setup() -> (Arc<SubscriberRegistry>, Broadcaster) {
        let registry = Arc::new(SubscriberRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        (registry, broadcaster)
    }

    #[test]
    fn test_broadcast_with_no_subscribers() {
        let (_, broadcaster) = setup();
        let report = broadcaster.broadcast(&Arc::new(Snapshot::empty()));
        assert_eq!(report, BroadcastReport::default());
    }

    #[test]
    fn test_failing_subscriber_is_pruned_and_others_still_receive() {
        let (registry, broadcaster) = setup();
        let good_a = Scripted::new(Behaviour::Accept);
        let gone = Scripted::new(Behaviour::Gone);
        let good_b = Scripted::new(Behaviour::Accept);
        registry.register(good_a.clone());
        registry.register(gone.clone());
        registry.register(good_b.clone());

        let snap = Arc::new(Snapshot::new(1000, Default::default()));
        let report = broadcaster.broadcast(&snap);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned, vec![gone.id]);
        assert!(!registry.contains(gone.id));

        broadcaster.broadcast(&snap);
        assert_eq!(gone.calls.load(Ordering::Relaxed), 1);
        assert_eq!(good_a.calls.load(Ordering::Relaxed), 2);
        assert_eq!(good_b.calls.load(Ordering::Relaxed), 2);
        assert_eq!(broadcaster.pruned_subscribers(), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let (registry, broadcaster) = setup();
        let bad = Scripted::new(Behaviour::Panic);
        let good = Scripted::new(Behaviour::Accept);
        registry.register(bad.clone());
        registry.register(good.clone());

        let report = broadcaster.broadcast(&Arc::new(Snapshot::empty()));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![bad.id]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_backpressure_drops_without_pruning() {
        let (registry, broadcaster) = setup();
        let (sub, rx) = ChannelSubscriber::new(1);
        let id = sub.id();
        registry.register(Arc::new(sub));

        let snap = Arc::new(Snapshot::empty());
        assert_eq!(broadcaster.broadcast(&snap).delivered, 1);
        let second = broadcaster.broadcast(&snap);
        assert_eq!(second.dropped, 1);
        assert!(second.pruned.is_empty());
        assert!(registry.contains(id));
        assert_eq!(broadcaster.dropped_deliveries(), 1);

        rx.recv().unwrap();
        assert_eq!(broadcaster.broadcast(&snap).delivered, 1);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let (registry, broadcaster) = setup();
        let (sub, rx) = ChannelSubscriber::new(4);
        let id = sub.id();
        registry.register(Arc::new(sub));
        drop(rx);

        let report = broadcaster.broadcast(&Arc::new(Snapshot::empty()));
        assert_eq!(report.pruned, vec![id]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_shared_not_copied() {
        let (registry, broadcaster) = setup();
        let (sub, rx) = ChannelSubscriber::new(1);
        registry.register(Arc::new(sub));

        let snap = Arc::new(Snapshot::new(5, Default::default()));
        broadcaster.broadcast(&snap);
        assert!(Arc::ptr_eq(&rx.recv().unwrap(), &snap));
    }
}
