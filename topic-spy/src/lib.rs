//! Message retention and filtering engine for publish/subscribe inspectors.
//!
//! Depend on this crate via `cargo add topic-spy`. It bundles the internal
//! crates behind feature flags so downstream users only pull what they use.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use spy_primitives as primitives;

/// Retention engine, topic summaries and browse view (enabled by `store` feature).
#[cfg(feature = "store")]
pub use spy_store as store;
