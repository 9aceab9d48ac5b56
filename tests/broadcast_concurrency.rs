use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use carstats::{Broadcaster, DeliveryError, Snapshot, Subscriber, SubscriberId, SubscriberRegistry};

struct Counter {
    id: SubscriberId,
    hits: AtomicUsize,
}

impl Counter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SubscriberId::new(),
            hits: AtomicUsize::new(0),
        })
    }
}

impl Subscriber for Counter {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, _snapshot: &Arc<Snapshot>) -> Result<(), DeliveryError> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn stable_subscribers_get_exactly_one_delivery_per_broadcast_under_churn() {
    const BROADCASTS: usize = 500;

    let registry = Arc::new(SubscriberRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));

    let stable: Vec<Arc<Counter>> = (0..8).map(|_| Counter::new()).collect();
    for s in &stable {
        registry.register(s.clone());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(5));

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                while !stop.load(Ordering::Relaxed) {
                    let transient = Counter::new();
                    let id = transient.id;
                    registry.register(transient);
                    registry.unregister(id);
                }
            })
        })
        .collect();

    barrier.wait();
    let snapshot = Arc::new(Snapshot::new(1, BTreeMap::new()));
    for _ in 0..BROADCASTS {
        let report = broadcaster.broadcast(&snapshot);
        assert!(report.pruned.is_empty());
        assert!(report.delivered >= stable.len());
    }
    stop.store(true, Ordering::Relaxed);
    for c in churners {
        c.join().unwrap();
    }

    for s in &stable {
        assert_eq!(s.hits.load(Ordering::Relaxed), BROADCASTS);
    }
    assert_eq!(registry.len(), stable.len());
}

#[test]
fn concurrent_broadcasts_deliver_once_each() {
    let registry = Arc::new(SubscriberRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
    let subs: Vec<Arc<Counter>> = (0..16).map(|_| Counter::new()).collect();
    for s in &subs {
        registry.register(s.clone());
    }

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let broadcaster = Arc::clone(&broadcaster);
            thread::spawn(move || {
                let snapshot = Arc::new(Snapshot::new(t, BTreeMap::new()));
                for _ in 0..100 {
                    broadcaster.broadcast(&snapshot);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    for s in &subs {
        assert_eq!(s.hits.load(Ordering::Relaxed), 400);
    }
}

#[test]
fn unregister_from_inside_delivery_does_not_deadlock() {
    struct SelfRemoving {
        id: SubscriberId,
        registry: Arc<SubscriberRegistry>,
    }

    impl Subscriber for SelfRemoving {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn deliver(&self, _snapshot: &Arc<Snapshot>) -> Result<(), DeliveryError> {
            self.registry.unregister(self.id);
            Ok(())
        }
    }

    let registry = Arc::new(SubscriberRegistry::new());
    let broadcaster = Broadcaster::new(Arc::clone(&registry));
    registry.register(Arc::new(SelfRemoving {
        id: SubscriberId::new(),
        registry: Arc::clone(&registry),
    }));
    let counter = Counter::new();
    registry.register(counter.clone());

    let report = broadcaster.broadcast(&Arc::new(Snapshot::empty()));
    assert_eq!(report.delivered, 2);
    assert_eq!(registry.len(), 1);
    assert_eq!(counter.hits.load(Ordering::Relaxed), 1);
}
