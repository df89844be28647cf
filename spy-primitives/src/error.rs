//! Shared error definitions for engine primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the engine primitives.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided subscription identifier could not be parsed.
    #[error("invalid subscription id: {source}")]
    InvalidSubscriptionId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// QoS level outside of the 0..=2 range.
    #[error("invalid qos level {level}: expected 0, 1 or 2")]
    InvalidQos {
        /// The rejected level.
        level: u8,
    },

    /// A message id string was not a valid sequence number.
    #[error("invalid message id `{value}`")]
    InvalidMessageId {
        /// The offending input.
        value: String,
    },
}
