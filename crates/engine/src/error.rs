//! Error taxonomy for the decision core.
//!
//! None of these are fatal. Each one is contained at the component that
//! produced it and surfaced to the caller as a status value.

use thiserror::Error;

use crate::model::ActuatorId;

/// An inbound command payload could not be decoded. Nothing is applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    /// Not JSON, or not a JSON object.
    #[error("malformed command payload: {0}")]
    Malformed(String),

    /// A recognised field has the wrong type.
    #[error("command field '{field}' must be a string")]
    Schema { field: &'static str },
}

/// Fetching or parsing thresholds failed. Stored thresholds stay as they were.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Connection refused, DNS failure, timeout.
    #[error("threshold fetch transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("threshold fetch returned HTTP {0}")]
    Status(u16),

    /// The body is not the expected JSON document.
    #[error("threshold payload could not be parsed: {0}")]
    Parse(String),

    /// The body parsed but carries unusable values.
    #[error("threshold payload rejected: {0}")]
    Invalid(String),
}

/// Feedback or telemetry could not be delivered.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    #[error("publish transport error: {0}")]
    Transport(String),

    #[error("payload could not be encoded: {0}")]
    Encode(String),

    /// The receiving end answered but refused the message.
    #[error("publish rejected with status {0}")]
    Rejected(u16),
}

/// A physical output write failed. The output level is unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriveError {
    #[error("no output pin mapped for {0}")]
    Unmapped(ActuatorId),

    #[error("output write failed for {actuator}: {message}")]
    Hardware {
        actuator: ActuatorId,
        message: String,
    },
}

/// The plant roster rejected an insert.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("plant roster is full ({capacity} slots)")]
    Full { capacity: usize },

    #[error("plant '{0}' is already registered")]
    Duplicate(String),
}
