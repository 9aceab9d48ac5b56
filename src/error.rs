//! Error types for carstats.
//!
//! All errors are strongly typed using thiserror, split by the layer that
//! raises them. Per-subscriber delivery failures have their own type because
//! they never escape a broadcast.

use thiserror::Error;

use crate::schema::FieldType;
use crate::subscriber::SubscriberId;

/// Validation errors raised while building schemas, snapshots or config.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field '{key}' is not declared in the schema")]
    UnknownField {
        key: String,
    },

    #[error("Field '{key}' expects {expected} but got {actual}")]
    TypeMismatch {
        key: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("Field '{key}' value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Field '{key}' is declared more than once")]
    DuplicateField {
        key: String,
    },

    #[error("Field '{key}' has invalid bounds: min {min} > max {max}")]
    InvalidBounds {
        key: String,
        min: f64,
        max: f64,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised by the lifecycle controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Permission to access the measurement source was denied")]
    PermissionDenied,

    #[error("Service has been shut down")]
    ShutDown,

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Errors reported by a measurement source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Subscription to source failed: {reason}")]
    SubscribeFailed {
        reason: String,
    },

    #[error("Source already has an active subscription")]
    AlreadySubscribed,
}

/// Failure delivering one snapshot to one subscriber.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber's channel is gone; it will be pruned.
    #[error("Subscriber {0} is unreachable")]
    Unreachable(SubscriberId),

    /// The subscriber is alive but its queue is full; this update is dropped.
    #[error("Subscriber {0} queue is full")]
    Backpressure(SubscriberId),
}

impl DeliveryError {
    /// Returns true if the subscriber should be removed from the registry.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Top-level error type for carstats.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CarStatsError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl CarStatsError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    #[must_use]
    pub const fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// Returns true if this error is the permission gate refusing access.
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::PermissionDenied))
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::PermissionDenied | ExecutionError::Timeout { .. }
            ),
            Self::Source(e) => matches!(e, SourceError::SubscribeFailed { .. }),
        }
    }
}

/// Result type alias for carstats operations.
pub type Result<T> = std::result::Result<T, CarStatsError>;
