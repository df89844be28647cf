//! Error types for the message store.

use thiserror::Error;

use crate::format::Formatter;

/// Errors emitted while constructing or feeding a store.
///
/// Runtime bookkeeping problems (a count that would go negative, a record that
/// was already removed) are never reported here: they are clamped and logged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The provided configuration was invalid.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(&'static str),
    /// Message record failed validation.
    #[error("invalid message record: {0}")]
    InvalidRecord(&'static str),
    /// Message filter failed validation.
    #[error("invalid message filter: {0}")]
    InvalidFilter(&'static str),
    /// Store was built without an outbound event queue.
    #[error("store event queue not configured")]
    MissingEventQueue,
    /// Background retention was requested outside a tokio runtime.
    #[error("background retention requires a running tokio runtime")]
    RuntimeUnavailable,
    /// Primitive value failed validation.
    #[error(transparent)]
    Primitive(#[from] spy_primitives::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure converting a raw payload into display text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// Payload is not valid hexadecimal text.
    #[error("payload is not valid hex: {reason}")]
    InvalidHex {
        /// Decoder message.
        reason: String,
    },
    /// Payload is not valid base64 text.
    #[error("payload is not valid base64: {reason}")]
    InvalidBase64 {
        /// Decoder message.
        reason: String,
    },
}

impl FormatError {
    /// Returns the formatter family that produced the error.
    #[must_use]
    pub fn formatter(&self) -> Formatter {
        match self {
            Self::InvalidHex { .. } => Formatter::HexDecode,
            Self::InvalidBase64 { .. } => Formatter::Base64Decode,
        }
    }
}
