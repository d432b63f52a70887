//! ff-core: shared types, IDs, errors, configuration, and pipeline events.
//!
//! This crate is the foundational dependency for the other ff-* crates,
//! providing type-safe identifiers, a unified error type, the notification
//! and operation-error events emitted by running pipelines, and the
//! application configuration.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use events::{ItemRef, Notification, NotificationStatus, OperationError};
pub use ids::*;
