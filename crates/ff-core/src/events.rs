//! Events emitted by a running pipeline.
//!
//! A run reports on two channels: [`Notification`]s for observability and
//! [`OperationError`]s for failures that are attributable to a stage
//! invocation but are not fatal to the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::Error;
use crate::ids::ItemId;

// ---------------------------------------------------------------------------
// ItemRef
// ---------------------------------------------------------------------------

/// A lightweight, cloneable description of an item at the time an event was
/// raised. Events never carry the item itself, since items own their file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: ItemId,
    pub name: String,
    pub path: PathBuf,
    /// Terminal error code, if the item had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// What happened to a stage or an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// An item was routed around a stage's handler.
    Skipped,
    /// A stage began a unit of work.
    Started,
    /// A stage finished a unit of work.
    Finished,
    /// A stage's handler returned an error.
    Failed,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationStatus::Skipped => "skipped",
            NotificationStatus::Started => "started",
            NotificationStatus::Finished => "finished",
            NotificationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An observability event raised by a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub stage: String,
    pub status: NotificationStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemRef>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Create a notification stamped with the current time.
    pub fn new(
        stage: impl Into<String>,
        status: NotificationStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            status,
            message: message.into(),
            item: None,
            timestamp: Utc::now(),
        }
    }

    /// Builder: attach the item this notification is about.
    pub fn with_item(mut self, item: ItemRef) -> Self {
        self.item = Some(item);
        self
    }
}

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// A non-fatal failure raised while a stage processed a batch or an item.
#[derive(Debug)]
pub struct OperationError {
    pub stage: String,
    /// The batch being processed, when the failure concerns several items.
    pub batch: Option<Vec<ItemRef>>,
    /// The single item being processed, when the failure concerns one item.
    pub item: Option<ItemRef>,
    pub cause: Error,
}

impl OperationError {
    pub fn new(stage: impl Into<String>, cause: Error) -> Self {
        Self {
            stage: stage.into(),
            batch: None,
            item: None,
            cause,
        }
    }

    /// Builder: attach the batch that was being processed.
    pub fn with_batch(mut self, batch: Vec<ItemRef>) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Builder: attach the item that was being processed.
    pub fn with_item(mut self, item: ItemRef) -> Self {
        self.item = Some(item);
        self
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.cause)?;
        if let Some(item) = &self.item {
            write!(f, " (item {item})")?;
        } else if let Some(batch) = &self.batch {
            write!(f, " (batch of {})", batch.len())?;
        }
        Ok(())
    }
}
