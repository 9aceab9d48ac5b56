//! Subscriber handles.
//!
//! A [`Subscriber`] is anything that can accept a snapshot without blocking.
//! The crate ships a channel-backed implementation whose receiving half is a
//! [`MeasurementStream`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CarStatsError, DeliveryError, ExecutionError, Result};
use crate::registry::SubscriberRegistry;
use crate::snapshot::Snapshot;

/// Identity of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Create a new random subscriber id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recipient of measurement updates.
///
/// `deliver` must not block. Return [`DeliveryError::Unreachable`] once the
/// recipient is gone for good; the broadcaster then removes it.
pub trait Subscriber: Send + Sync {
    /// Stable identity used for deduplication and removal.
    fn id(&self) -> SubscriberId;

    /// Hand one snapshot to the recipient.
    ///
    /// # Errors
    ///
    /// `Unreachable` if the recipient is gone, `Backpressure` if it cannot
    /// take this update right now.
    fn deliver(&self, snapshot: &Arc<Snapshot>) -> std::result::Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded crossbeam channel.
#[derive(Debug)]
pub struct ChannelSubscriber {
    id: SubscriberId,
    tx: Sender<Arc<Snapshot>>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiver for its updates.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<Snapshot>>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                id: SubscriberId::new(),
                tx,
            },
            rx,
        )
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, snapshot: &Arc<Snapshot>) -> std::result::Result<(), DeliveryError> {
        match self.tx.try_send(Arc::clone(snapshot)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Backpressure(self.id)),
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Unreachable(self.id)),
        }
    }
}

/// Receiving end of a channel subscription.
///
/// Dropping the stream unregisters it. If the registry is already gone the
/// drop is a no-op.
#[derive(Debug)]
pub struct MeasurementStream {
    id: SubscriberId,
    rx: Receiver<Arc<Snapshot>>,
    registry: Weak<SubscriberRegistry>,
    unregistered: AtomicBool,
}

impl MeasurementStream {
    pub(crate) fn new(
        id: SubscriberId,
        rx: Receiver<Arc<Snapshot>>,
        registry: Weak<SubscriberRegistry>,
    ) -> Self {
        Self {
            id,
            rx,
            registry,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The subscriber id backing this stream.
    #[must_use]
    pub const fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    /// Explicit unregistration. Idempotent.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }

    /// Receive the next snapshot (blocking).
    pub fn recv(&self) -> Result<Arc<Snapshot>> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next snapshot with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<Snapshot>> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => CarStatsError::Execution(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Non-blocking receive; `Ok(None)` when nothing is queued.
    pub fn try_recv(&self) -> Result<Option<Arc<Snapshot>>> {
        match self.rx.try_recv() {
            Ok(s) => Ok(Some(s)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Number of snapshots waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Drop for MeasurementStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn disconnected() -> CarStatsError {
    CarStatsError::Execution(ExecutionError::Disconnected {
        path: "measurement_stream".to_string(),
    })
}
