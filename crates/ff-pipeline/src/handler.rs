//! The [`OperationHandler`] trait performs the work of one named stage.
//!
//! Handlers receive a batch of items and hand back whatever should continue
//! downstream: the same items, more (sources), or fewer (sinks). Verdicts on
//! individual items are recorded on the items themselves; a returned
//! [`HandlerError`] means the invocation as a whole went wrong.

use async_trait::async_trait;
use ff_core::{Error, Notification, NotificationStatus, OperationError};
use tokio::sync::mpsc;

use crate::item::ProcessableItem;

/// A failed handler invocation.
///
/// The items the handler was holding are handed back so that they can still
/// continue downstream.
#[derive(Debug)]
pub struct HandlerError {
    pub cause: Error,
    pub items: Vec<ProcessableItem>,
}

impl HandlerError {
    pub fn new(cause: Error, items: Vec<ProcessableItem>) -> Self {
        Self { cause, items }
    }
}

/// Result of a handler invocation.
pub type HandlerResult = std::result::Result<Vec<ProcessableItem>, HandlerError>;

/// The work behind a named pipeline stage.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// The operation name this handler was registered under.
    fn name(&self) -> &str;

    /// Whether the stage may process its items one at a time, with many
    /// single-item invocations in flight at once.
    ///
    /// Handlers that need their whole input at once (or that produce items
    /// from nothing) return `false`, which is the default.
    fn allows_concurrency(&self) -> bool {
        false
    }

    /// Process a batch of items.
    async fn handle(&self, items: Vec<ProcessableItem>, sinks: &Sinks) -> HandlerResult;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// The error and notification channels a run reports on.
///
/// Sends wait for channel capacity, so the receivers must be drained while a
/// run is in progress. A dropped receiver is tolerated: the event is logged
/// and discarded.
#[derive(Debug, Clone)]
pub struct Sinks {
    errors: Option<mpsc::Sender<OperationError>>,
    notifications: Option<mpsc::Sender<Notification>>,
}

impl Sinks {
    pub fn new(
        errors: mpsc::Sender<OperationError>,
        notifications: mpsc::Sender<Notification>,
    ) -> Self {
        Self {
            errors: Some(errors),
            notifications: Some(notifications),
        }
    }

    /// Create sinks together with their receivers.
    pub fn channel(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<OperationError>,
        mpsc::Receiver<Notification>,
    ) {
        let (err_tx, err_rx) = mpsc::channel(capacity);
        let (note_tx, note_rx) = mpsc::channel(capacity);
        (Self::new(err_tx, note_tx), err_rx, note_rx)
    }

    /// Sinks that only log.
    pub fn disabled() -> Self {
        Self {
            errors: None,
            notifications: None,
        }
    }

    /// Publish a notification.
    pub async fn notify(&self, notification: Notification) {
        tracing::trace!(
            stage = %notification.stage,
            status = %notification.status,
            "{}",
            notification.message
        );
        if let Some(tx) = &self.notifications {
            if tx.send(notification).await.is_err() {
                tracing::debug!("Notification receiver dropped; discarding event");
            }
        }
    }

    /// Shorthand for a notification without an item.
    pub async fn status(&self, stage: &str, status: NotificationStatus, message: impl Into<String>) {
        self.notify(Notification::new(stage, status, message)).await;
    }

    /// Report a non-fatal operational error.
    pub async fn report(&self, error: OperationError) {
        tracing::warn!("{error}");
        if let Some(tx) = &self.errors {
            if tx.send(error).await.is_err() {
                tracing::debug!("Error receiver dropped; discarding report");
            }
        }
    }
}
