//! Measurement store: the latest snapshot, swapped wholesale.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::snapshot::Snapshot;
use crate::value::Value;

/// Holds the current snapshot.
///
/// Updates replace the shared `Arc` under a write lock; readers clone the
/// `Arc`, so a reader never sees fields from two different snapshots. The
/// store does not validate anything.
#[derive(Debug)]
pub struct MeasurementStore {
    current: RwLock<Arc<Snapshot>>,
    updates: AtomicU64,
}

impl Default for MeasurementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
            updates: AtomicU64::new(0),
        }
    }

    /// Replace the current snapshot.
    pub fn update(&self, snapshot: impl Into<Arc<Snapshot>>) {
        let next = snapshot.into();
        let previous = std::mem::replace(&mut *self.current.write(), next);
        self.updates.fetch_add(1, Ordering::Relaxed);
        // Release the old snapshot outside the lock.
        drop(previous);
    }

    /// The latest snapshot, or [`Snapshot::empty`] before the first update.
    #[must_use]
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Values of the current snapshot.
    #[must_use]
    pub fn merged_measurements(&self) -> BTreeMap<String, Value> {
        self.current().values.clone()
    }

    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::schema::{KEY_LAT, KEY_LON, KEY_PROVIDER};

    fn snap(ts: i64, pairs: &[(&str, Value)]) -> Snapshot {
        Snapshot::new(ts, pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect())
    }

    #[test]
    fn test_initial_snapshot_is_empty() {
        let store = MeasurementStore::new();
        assert_eq!(*store.current(), Snapshot::empty());
        assert!(store.merged_measurements().is_empty());
        assert_eq!(store.update_count(), 0);
    }

    #[test]
    fn test_update_replaces_without_merging() {
        let store = MeasurementStore::new();
        store.update(snap(1, &[(KEY_LAT, Value::Float(1.0)), (KEY_PROVIDER, Value::from("gps"))]));

        let second = snap(2, &[(KEY_LON, Value::Float(2.0))]);
        store.update(second.clone());

        assert_eq!(*store.current(), second);
        assert!(!store.merged_measurements().contains_key(KEY_LAT));
        assert_eq!(store.update_count(), 2);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let store = MeasurementStore::new();
        store.update(snap(1, &[(KEY_LAT, Value::Float(1.0))]));
        let held = store.current();
        store.update(snap(2, &[(KEY_LAT, Value::Float(2.0))]));
        assert_eq!(held.timestamp, 1);
        assert_eq!(store.current().timestamp, 2);
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_snapshot() {
        let store = Arc::new(MeasurementStore::new());

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 1..=2_000i64 {
                    #[allow(clippy::cast_precision_loss)]
                    let v = i as f64 / 100.0;
                    let values = [(KEY_LAT, Value::Float(v)), (KEY_LON, Value::Float(v))];
                    store.update(snap(i, &values));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let s = store.current();
                        if s.is_empty() {
                            continue;
                        }
                        #[allow(clippy::cast_precision_loss)]
                        let expected = Value::Float(s.timestamp as f64 / 100.0);
                        assert_eq!(s.get(KEY_LAT), Some(&expected));
                        assert_eq!(s.get(KEY_LON), Some(&expected));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.current().timestamp, 2_000);
    }
}
