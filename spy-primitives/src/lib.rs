//! Core shared types for the topic-spy message engine.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod qos;

/// Error type and result alias shared across the engine.
pub use error::{Error, Result};
/// Message sequence numbers and the subscription back-reference handle.
pub use ids::{MessageId, MessageIdGenerator, SubscriptionId};
/// Delivery guarantee attached to a received message.
pub use qos::Qos;
