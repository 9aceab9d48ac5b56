//! Source lifecycle controller.
//!
//! Activation of the measurement source is gated by a [`PermissionGate`].
//! The controller is a small state machine:
//!
//! ```text
//! Uninitialized --denied--> AwaitingPermission --signal + granted--> Active
//!       \______________________granted_____________________________/
//! any --shutdown--> ShutDown
//! ```
//!
//! Permission-granted signals arrive over a bounded channel and are consumed
//! by a dedicated worker thread which retries activation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::config::ServiceConfig;
use crate::error::{CarStatsError, ExecutionError, Result};
use crate::schema::Schema;
use crate::snapshot::Reading;
use crate::source::{MeasurementSource, PermissionGate, ReadingSink};
use crate::store::MeasurementStore;

/// Lifecycle of the source subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    AwaitingPermission,
    Active,
    ShutDown,
}

#[derive(Debug)]
enum ControlEvent {
    PermissionGranted,
    Shutdown,
}

/// Handle the permission flow uses to report that access was granted.
#[derive(Debug, Clone)]
pub struct PermissionSignal {
    tx: Sender<ControlEvent>,
}

impl PermissionSignal {
    /// Ask the controller to retry activation. Non-blocking; returns `false`
    /// if the controller is gone or its signal queue is full.
    pub fn grant(&self) -> bool {
        match self.tx.try_send(ControlEvent::PermissionGranted) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("permission signal queue full, grant dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Reading ingestion: validate, store, broadcast.
#[derive(Debug)]
pub(crate) struct Pipeline {
    schema: Schema,
    store: Arc<MeasurementStore>,
    broadcaster: Broadcaster,
    accepting: AtomicBool,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl Pipeline {
    pub(crate) fn new(
        schema: Schema,
        store: Arc<MeasurementStore>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            schema,
            store,
            broadcaster,
            accepting: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Convert, store and fan out one reading.
    ///
    /// Returns `Ok(None)` if the pipeline is not accepting readings.
    pub(crate) fn ingest(&self, reading: &Reading) -> Result<Option<BroadcastReport>> {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::trace!(timestamp = reading.timestamp, "reading ignored, source inactive");
            return Ok(None);
        }

        tracing::trace!(
            lat = reading.latitude,
            lon = reading.longitude,
            provider = %reading.provider,
            timestamp = reading.timestamp,
            "location"
        );

        let snapshot = match reading.to_snapshot(&self.schema) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, timestamp = reading.timestamp, "reading rejected");
                return Err(e.into());
            }
        };

        self.store.update(Arc::clone(&snapshot));
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(Some(self.broadcaster.broadcast(&snapshot)))
    }

    pub(crate) fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub(crate) fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub(crate) fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// True if `reading` is newer than what the store holds.
    fn is_newer(&self, reading: &Reading) -> bool {
        let current = self.store.current();
        current.is_empty() || reading.timestamp > current.timestamp
    }

    fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }
}

struct ControllerInner {
    cfg: ServiceConfig,
    source: Arc<dyn MeasurementSource>,
    permissions: Arc<dyn PermissionGate>,
    pipeline: Arc<Pipeline>,
    state: Mutex<LifecycleState>,
    // Serializes activations. `state` is never held across a call into the
    // source or a listener.
    activation: Mutex<()>,
}

impl ControllerInner {
    fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn initialize(&self) -> Result<LifecycleState> {
        let activation = self.activation.lock();

        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Active => {
                    tracing::debug!("source already active");
                    return Ok(LifecycleState::Active);
                }
                LifecycleState::ShutDown => return Err(ExecutionError::ShutDown.into()),
                LifecycleState::Uninitialized | LifecycleState::AwaitingPermission => {}
            }

            if !self.permissions.is_granted() {
                *state = LifecycleState::AwaitingPermission;
                tracing::info!("location permission missing, awaiting grant");
                return Err(ExecutionError::PermissionDenied.into());
            }
        }

        let last_known = if self.cfg.request_last_known {
            self.source.last_known_reading()
        } else {
            None
        };

        let pipeline = Arc::clone(&self.pipeline);
        let sink = ReadingSink::new(move |reading| {
            let _ = pipeline.ingest(&reading);
        });

        if let Err(e) = self.source.subscribe(self.cfg.location_request(), sink) {
            tracing::warn!(error = %e, "source subscription failed");
            return Err(e.into());
        }

        {
            let mut state = self.state.lock();
            if *state == LifecycleState::ShutDown {
                drop(state);
                // Shut down while subscribing; the subscription is ours to undo.
                self.source.unsubscribe();
                return Err(ExecutionError::ShutDown.into());
            }
            self.pipeline.set_accepting(true);
            *state = LifecycleState::Active;
        }
        tracing::info!(
            interval_ms = self.cfg.update_interval_ms,
            accuracy = ?self.cfg.accuracy,
            "source subscription active"
        );
        drop(activation);

        if let Some(reading) = last_known {
            if self.pipeline.is_newer(&reading) {
                // A bad cached fix must not fail activation.
                let _ = self.pipeline.ingest(&reading);
            }
        }
        Ok(LifecycleState::Active)
    }

    fn shutdown(&self) {
        let previous = {
            let mut state = self.state.lock();
            self.pipeline.set_accepting(false);
            std::mem::replace(&mut *state, LifecycleState::ShutDown)
        };
        match previous {
            LifecycleState::ShutDown => return,
            LifecycleState::Active => self.source.unsubscribe(),
            LifecycleState::Uninitialized | LifecycleState::AwaitingPermission => {}
        }
        tracing::info!("source controller shut down");
    }
}

/// Permission-gated owner of the source subscription.
pub struct SourceController {
    inner: Arc<ControllerInner>,
    signal_tx: Sender<ControlEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SourceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SourceController {
    /// Create the controller and start its signal worker. Does not activate.
    ///
    /// # Errors
    ///
    /// `Internal` if the worker thread cannot be spawned.
    pub(crate) fn start(
        cfg: ServiceConfig,
        source: Arc<dyn MeasurementSource>,
        permissions: Arc<dyn PermissionGate>,
        pipeline: Arc<Pipeline>,
    ) -> Result<Self> {
        let (signal_tx, signal_rx) = bounded::<ControlEvent>(cfg.signal_queue_capacity.max(1));
        let inner = Arc::new(ControllerInner {
            cfg,
            source,
            permissions,
            pipeline,
            state: Mutex::new(LifecycleState::Uninitialized),
            activation: Mutex::new(()),
        });

        let worker_inner = Arc::clone(&inner);
        let join = thread::Builder::new()
            .name("carstats-permission".to_string())
            .spawn(move || signal_loop(&worker_inner, &signal_rx))
            .map_err(|e| {
                CarStatsError::internal(format!("failed to spawn permission worker: {e}"))
            })?;

        Ok(Self {
            inner,
            signal_tx,
            worker: Mutex::new(Some(join)),
        })
    }

    /// Try to activate the source.
    ///
    /// Idempotent once active.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if the gate refuses (state becomes
    /// `AwaitingPermission`), `ShutDown` after shutdown, or the source's
    /// subscription error.
    pub fn initialize(&self) -> Result<LifecycleState> {
        self.inner.initialize()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// True iff the permission gate currently denies access.
    #[must_use]
    pub fn needs_permissions(&self) -> bool {
        !self.inner.permissions.is_granted()
    }

    /// Start the external permission flow if access is missing.
    pub fn request_permissions(&self) {
        if !self.needs_permissions() {
            tracing::debug!("permission already granted, request skipped");
            return;
        }
        self.inner.permissions.request(self.permission_signal());
    }

    /// A handle that triggers an activation retry.
    #[must_use]
    pub fn permission_signal(&self) -> PermissionSignal {
        PermissionSignal {
            tx: self.signal_tx.clone(),
        }
    }

    /// Unsubscribe from the source and stop the signal worker. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
        let _ = self.signal_tx.try_send(ControlEvent::Shutdown);

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SourceController {
    fn drop(&mut self) {
        self.inner.shutdown();
        let _ = self.signal_tx.try_send(ControlEvent::Shutdown);
        // Detach: the worker exits on the shutdown event or once every
        // signal sender is dropped.
        drop(self.worker.lock().take());
    }
}

fn signal_loop(inner: &ControllerInner, rx: &Receiver<ControlEvent>) {
    while let Ok(event) = rx.recv() {
        match event {
            ControlEvent::PermissionGranted => match inner.initialize() {
                Ok(state) => tracing::debug!(?state, "activation retried after grant"),
                Err(CarStatsError::Execution(ExecutionError::ShutDown)) => break,
                Err(e) => tracing::debug!(error = %e, "activation retry failed"),
            },
            ControlEvent::Shutdown => break,
        }
    }
}
