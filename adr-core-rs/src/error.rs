//! Error types for the core and its store

use std::time::Duration;
use thiserror::Error;

use crate::types::{EventId, ReportHandle, ResourceId};

/// Errors raised by a persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("name already stored: {0}")]
    Duplicate(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in registration, reporting and event handling
#[derive(Debug, Error)]
pub enum DrError {
    #[error("resource already registered: {0}")]
    AlreadyRegistered(String),

    #[error("invalid sampling window: min {min:?} > max {max:?}")]
    InvalidSamplingWindow { min: Duration, max: Duration },

    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),

    #[error("unknown report subscription: {0}")]
    UnknownSubscription(ReportHandle),

    #[error("unknown event: {0}")]
    UnknownEvent(EventId),

    #[error("event {event_id} targets {expected}, decision came from {actual}")]
    TargetMismatch {
        event_id: EventId,
        expected: ResourceId,
        actual: ResourceId,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    #[error("event id collision: {0}")]
    EventIdCollision(EventId),

    #[error("event delivery failed: {0}")]
    Delivery(String),
}

impl DrError {
    /// Expected negative outcome, answered with a protocol-level "no"
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DrError::AlreadyRegistered(_)
                | DrError::InvalidSamplingWindow { .. }
                | DrError::UnknownResource(_)
                | DrError::UnknownSubscription(_)
                | DrError::UnknownEvent(_)
                | DrError::TargetMismatch { .. }
                | DrError::InvalidInput(_)
        )
    }

    /// Transient fault the protocol layer may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, DrError::StorageUnavailable(_) | DrError::Delivery(_))
    }
}
