//! Transport error types

use thiserror::Error;

use crate::types::RequestId;

/// Errors that can occur during transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    // Common errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    // Register access
    #[error("Unknown register: {0}")]
    UnknownRegister(String),

    #[error("Register write to {register} rejected: {reason}")]
    WriteRejected { register: String, reason: String },

    // Request/reply bookkeeping
    #[error("No buffered result for request {0}")]
    UnknownRequest(RequestId),

    #[error("Request {0} has not completed")]
    NotCompleted(RequestId),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}
