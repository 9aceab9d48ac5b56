//! Service configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;
use crate::source::{Accuracy, LocationRequest};

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Interval between continuous source updates.
    pub update_interval_ms: u64,
    /// Accuracy preference passed to the source.
    pub accuracy: Accuracy,
    /// Ask the source for its last known reading on activation.
    pub request_last_known: bool,
    /// Per-subscriber queue capacity for channel subscriptions.
    pub subscriber_queue_capacity: usize,
    /// Max queued permission signals before further grants are dropped.
    pub signal_queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            accuracy: Accuracy::High,
            request_last_known: true,
            subscriber_queue_capacity: 64,
            signal_queue_capacity: 16,
        }
    }
}

impl ServiceConfig {
    /// Parse a JSON document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the JSON is malformed or fails [`Self::validate`].
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// `InvalidConfig` for a zero interval or zero capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let reason = if self.update_interval_ms == 0 {
            "update_interval_ms must be greater than zero"
        } else if self.subscriber_queue_capacity == 0 {
            "subscriber_queue_capacity must be greater than zero"
        } else if self.signal_queue_capacity == 0 {
            "signal_queue_capacity must be greater than zero"
        } else {
            return Ok(());
        };
        Err(ValidationError::InvalidConfig {
            reason: reason.to_string(),
        })
    }

    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// The request handed to the source on activation.
    #[must_use]
    pub const fn location_request(&self) -> LocationRequest {
        LocationRequest {
            interval: self.update_interval(),
            accuracy: self.accuracy,
        }
    }
}
