//! Snapshots and raw source readings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schema::{Schema, KEY_LAT, KEY_LON, KEY_PROVIDER};
use crate::value::Value;

/// One timestamped, complete set of measurement values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Observation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub values: BTreeMap<String, Value>,
}

impl Snapshot {
    /// The initial snapshot: timestamp 0 and no values.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(timestamp: i64, values: BTreeMap<String, Value>) -> Self {
        Self { timestamp, values }
    }

    /// Build a snapshot after checking every value against `schema`.
    ///
    /// # Errors
    ///
    /// Propagates the first schema violation; nothing is constructed.
    pub fn validated(
        schema: &Schema,
        timestamp: i64,
        values: BTreeMap<String, Value>,
    ) -> Result<Self, ValidationError> {
        schema.validate(&values)?;
        Ok(Self { timestamp, values })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Observation time as a UTC instant, if representable.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// A raw fix emitted by a location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub latitude: f64,
    pub longitude: f64,
    /// Provider name, e.g. `"gps"` or `"fused"`.
    pub provider: String,
    /// Fix time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Reading {
    pub fn new(latitude: f64, longitude: f64, provider: impl Into<String>, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            provider: provider.into(),
            timestamp,
        }
    }

    /// Map provider fields onto schema keys.
    #[must_use]
    pub fn to_values(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (KEY_LAT.to_string(), Value::Float(self.latitude)),
            (KEY_LON.to_string(), Value::Float(self.longitude)),
            (KEY_PROVIDER.to_string(), Value::String(self.provider.clone())),
        ])
    }

    /// Convert into a schema-checked snapshot.
    ///
    /// # Errors
    ///
    /// Any schema violation, e.g. a latitude outside `[-90, 90]`.
    pub fn to_snapshot(&self, schema: &Schema) -> Result<Snapshot, ValidationError> {
        Snapshot::validated(schema, self.timestamp, self.to_values())
    }
}
