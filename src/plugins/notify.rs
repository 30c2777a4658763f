//! Best-effort notifications emitted after a vote or reply commits.
//!
//! Delivery is never on the commit path: a failing sink is logged and ignored, and a
//! crash between commit and delivery simply loses the notification.

use crate::core::error::BoardError;
use crate::core::target::TargetKind;
use crate::core::time;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    VoteCast,
    ReplyCreated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient_id: String,
    pub actor_id: String,
    pub target_kind: TargetKind,
    pub target_id: String,
    pub created_at: i64,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        recipient_id: &str,
        actor_id: &str,
        target_kind: TargetKind,
        target_id: &str,
    ) -> Self {
        Self {
            kind,
            recipient_id: recipient_id.to_string(),
            actor_id: actor_id.to_string(),
            target_kind,
            target_id: target_id.to_string(),
            created_at: time::now_ms(),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), BoardError>;
}

/// Writes notifications to the log.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn deliver(&self, n: &Notification) -> Result<(), BoardError> {
        info!(
            kind = ?n.kind,
            recipient = %n.recipient_id,
            actor = %n.actor_id,
            subject = %format!("{}:{}", n.target_kind, n.target_id),
            "notification"
        );
        Ok(())
    }
}

pub struct NullSink;

impl NotificationSink for NullSink {
    fn deliver(&self, _notification: &Notification) -> Result<(), BoardError> {
        Ok(())
    }
}

/// Keeps every delivered notification in memory.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl NotificationSink for MemorySink {
    fn deliver(&self, notification: &Notification) -> Result<(), BoardError> {
        // Append-only: a poisoned list is still consistent.
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Deliver unless the agent is acting on its own content. Never fails.
    pub fn dispatch(&self, notification: Notification) {
        if notification.recipient_id == notification.actor_id {
            return;
        }
        if let Err(e) = self.sink.deliver(&notification) {
            warn!(kind = ?notification.kind, error = %e, "notification dropped");
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}
