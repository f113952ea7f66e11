use thiserror::Error;

/// Errors reported by the persistence collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Errors reported by the notification transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Transport closed")]
    Closed,
}

/// Errors reported by the execution layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Order rejected by venue: {0}")]
    Rejected(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timeout waiting for execution report")]
    Timeout,
}
