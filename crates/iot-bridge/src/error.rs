//! Bridge Error Types

use std::time::Duration;
use thiserror::Error;

/// Why an update request did not produce a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The bin answered with `status: "error"`
    #[error("{0}")]
    Device(String),

    #[error("Invalid bin id '{0}'")]
    InvalidTarget(String),

    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),

    #[error("Failed to publish update request: {0}")]
    Publish(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Transport disconnected while waiting for response")]
    Disconnected,

    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Client error: {0}")]
    Client(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Topic pattern must not be empty")]
    Empty,

    #[error("Empty segment at position {0}")]
    EmptySegment(usize),

    #[error("'#' is only allowed as the last segment")]
    MultiLevelNotLast,

    #[error("Malformed capture '{0}'")]
    MalformedCapture(String),

    #[error("Unknown capture class '{0}' (expected hex, digits or any)")]
    UnknownClass(String),

    #[error("Duplicate capture name '{0}'")]
    DuplicateName(String),
}
