//! Error types for the event bus

use thiserror::Error;

/// Result type for bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Errors that can occur on the bus.
///
/// Enrolling and emitting never fail; an emit on a key nobody subscribed to
/// is a no-op. The only fallible operation is a blocking wait, which can be
/// released by shutdown before every required subscription has fired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("wait on required subscription {key} was cancelled by shutdown")]
    WaitCancelled { key: String },
}
