//! The surface exposed to external callers.
//!
//! [`CarStats`] is the operation set a remote client reaches through whatever
//! RPC layer carries it. [`CarStatsService`] wires the schema, store,
//! registry, broadcaster and lifecycle controller together and implements it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::broadcast::Broadcaster;
use crate::config::ServiceConfig;
use crate::controller::{LifecycleState, PermissionSignal, Pipeline, SourceController};
use crate::error::Result;
use crate::registry::SubscriberRegistry;
use crate::schema::Schema;
use crate::snapshot::Snapshot;
use crate::source::{MeasurementSource, PermissionGate};
use crate::store::MeasurementStore;
use crate::subscriber::{ChannelSubscriber, MeasurementStream, Subscriber, SubscriberId};
use crate::value::Value;

/// Operations available to external callers.
pub trait CarStats: Send + Sync {
    /// Add a listener. Returns `false` if it is already registered.
    fn register_listener(&self, subscriber: Arc<dyn Subscriber>) -> bool;

    /// Remove a listener. Returns `false` if it was not registered.
    fn unregister_listener(&self, id: SubscriberId) -> bool;

    /// Values of the latest snapshot.
    fn get_merged_measurements(&self) -> BTreeMap<String, Value>;

    fn get_schema(&self) -> Schema;

    /// True iff the permission gate currently denies access.
    fn needs_permissions(&self) -> bool;

    /// Start the external permission-request flow.
    fn request_permissions(&self);
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub state: LifecycleState,
    pub listeners: usize,
    pub readings_accepted: u64,
    pub readings_rejected: u64,
    pub dropped_deliveries: u64,
    pub pruned_subscribers: u64,
}

/// Measurement service for one source.
#[derive(Debug)]
pub struct CarStatsService {
    cfg: ServiceConfig,
    schema: Schema,
    store: Arc<MeasurementStore>,
    registry: Arc<SubscriberRegistry>,
    pipeline: Arc<Pipeline>,
    controller: SourceController,
}

impl CarStatsService {
    /// Build the service with the location schema and attempt activation.
    ///
    /// A denied permission is not an error here: the service starts in
    /// `AwaitingPermission` and activates once a grant is signalled.
    ///
    /// # Errors
    ///
    /// Invalid config, a worker spawn failure, or the source refusing the
    /// subscription.
    pub fn new(
        cfg: ServiceConfig,
        source: Arc<dyn MeasurementSource>,
        permissions: Arc<dyn PermissionGate>,
    ) -> Result<Self> {
        Self::with_schema(cfg, Schema::location(), source, permissions)
    }

    /// Like [`Self::new`] with a caller-supplied schema.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn with_schema(
        cfg: ServiceConfig,
        schema: Schema,
        source: Arc<dyn MeasurementSource>,
        permissions: Arc<dyn PermissionGate>,
    ) -> Result<Self> {
        cfg.validate()?;

        let store = Arc::new(MeasurementStore::new());
        let registry = Arc::new(SubscriberRegistry::new());
        let pipeline = Arc::new(Pipeline::new(
            schema.clone(),
            Arc::clone(&store),
            Broadcaster::new(Arc::clone(&registry)),
        ));
        let controller =
            SourceController::start(cfg.clone(), source, permissions, Arc::clone(&pipeline))?;

        let service = Self {
            cfg,
            schema,
            store,
            registry,
            pipeline,
            controller,
        };

        match service.controller.initialize() {
            Ok(_) => {}
            Err(e) if e.is_permission_denied() => {}
            Err(e) => return Err(e),
        }
        Ok(service)
    }

    /// Retry activation. Idempotent once active.
    ///
    /// # Errors
    ///
    /// See [`SourceController::initialize`].
    pub fn initialize(&self) -> Result<LifecycleState> {
        self.controller.initialize()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Handle the permission flow uses to report a grant.
    #[must_use]
    pub fn permission_signal(&self) -> PermissionSignal {
        self.controller.permission_signal()
    }

    /// Register a channel-backed listener and return its stream.
    #[must_use]
    pub fn subscribe(&self) -> MeasurementStream {
        let (subscriber, rx) = ChannelSubscriber::new(self.cfg.subscriber_queue_capacity);
        let id = subscriber.id();
        self.registry.register(Arc::new(subscriber));
        MeasurementStream::new(id, rx, Arc::downgrade(&self.registry))
    }

    /// The latest snapshot including its timestamp.
    #[must_use]
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.store.current()
    }

    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        let broadcaster = self.pipeline.broadcaster();
        ServiceStats {
            state: self.state(),
            listeners: self.registry.len(),
            readings_accepted: self.pipeline.accepted(),
            readings_rejected: self.pipeline.rejected(),
            dropped_deliveries: broadcaster.dropped_deliveries(),
            pruned_subscribers: broadcaster.pruned_subscribers(),
        }
    }

    /// Release the source subscription and drop every listener.
    pub fn shutdown(&self) {
        self.controller.shutdown();
        self.registry.clear();
    }
}

impl CarStats for CarStatsService {
    fn register_listener(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        self.registry.register(subscriber)
    }

    fn unregister_listener(&self, id: SubscriberId) -> bool {
        self.registry.unregister(id)
    }

    fn get_merged_measurements(&self) -> BTreeMap<String, Value> {
        self.store.merged_measurements()
    }

    fn get_schema(&self) -> Schema {
        self.schema.clone()
    }

    fn needs_permissions(&self) -> bool {
        self.controller.needs_permissions()
    }

    fn request_permissions(&self) {
        self.controller.request_permissions();
    }
}
