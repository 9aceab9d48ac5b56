//! # carstats - typed measurements with permission-gated broadcast
//!
//! carstats keeps the latest reading of a measurement source (here, the
//! device location) as a typed snapshot and fans every update out to a
//! dynamic set of subscribers.
//!
//! ## Core Concepts
//!
//! - **Schema**: immutable type, unit and bound metadata for every field
//! - **Snapshot**: one timestamped, complete set of measurement values
//! - **Subscriber**: a registered recipient of updates; unreachable
//!   subscribers are pruned automatically
//! - **Source controller**: activates the source only once permission is
//!   granted, retrying when the permission flow signals a grant
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use carstats::{
//!     CarStats, CarStatsService, Reading, ReplaySource, ServiceConfig, StaticPermission,
//! };
//!
//! let source = Arc::new(ReplaySource::new(vec![Reading::new(52.5, 13.4, "gps", 1000)]));
//! let service = CarStatsService::new(
//!     ServiceConfig::default(),
//!     source,
//!     Arc::new(StaticPermission::granted()),
//! )?;
//!
//! let stream = service.subscribe();
//! let snapshot = stream.recv_timeout(Duration::from_secs(2))?;
//! println!("{} -> {:?}", snapshot.timestamp, service.get_merged_measurements());
//! # Ok::<(), carstats::CarStatsError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod broadcast;
pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod subscriber;
pub mod value;

// Re-export primary types at crate root for convenience
pub use broadcast::{BroadcastReport, Broadcaster};
pub use config::ServiceConfig;
pub use controller::{LifecycleState, PermissionSignal, SourceController};
pub use error::{CarStatsError, DeliveryError, ExecutionError, Result, SourceError, ValidationError};
pub use registry::SubscriberRegistry;
pub use schema::{FieldSchema, FieldType, Schema, SchemaBuilder, KEY_LAT, KEY_LON, KEY_PROVIDER};
pub use service::{CarStats, CarStatsService, ServiceStats};
pub use snapshot::{Reading, Snapshot};
pub use source::{
    Accuracy, LocationRequest, MeasurementSource, PermissionGate, ReadingSink, ReplaySource,
    StaticPermission,
};
pub use store::MeasurementStore;
pub use subscriber::{ChannelSubscriber, MeasurementStream, Subscriber, SubscriberId};
pub use value::Value;
